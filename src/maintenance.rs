//! Operations that edit the best-price map outside a normal run.

use crate::engine::tracker::BestPriceTracker;
use crate::store::{BestFile, Store};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;

fn save(store: &Store, file: BestFile, tracker: BestPriceTracker) -> Result<()> {
    store.save_best(&BestFile {
        updated_utc: Some(Utc::now()),
        by_route: tracker.into_records(),
        ..file
    })
}

/// Remove the record for one route_key. Returns whether it existed.
pub fn reset_route(store: &Store, route_key: &str) -> Result<bool> {
    let mut file = store.load_best()?;
    let mut tracker = BestPriceTracker::new(std::mem::take(&mut file.by_route));
    let removed = tracker.reset(route_key);
    match &removed {
        Some(record) => tracing::info!(
            route = route_key,
            price = ?record.price_total,
            "best record reset"
        ),
        None => {
            tracing::warn!(route = route_key, "no best record for this route key");
            return Ok(false);
        }
    }
    save(store, file, tracker)?;
    Ok(true)
}

/// Keep only the route keys seen in the most recent run of the history log.
/// Returns the removed keys.
pub fn prune_to_last_run(store: &Store) -> Result<Vec<String>> {
    let history = store.read_history()?;
    let Some(last) = history.last() else {
        anyhow::bail!("history log is empty, nothing to prune against");
    };
    let run_id = last.run_id.clone();
    let keep: HashSet<String> = history
        .iter()
        .filter(|r| r.run_id == run_id)
        .map(|r| r.route_key.clone())
        .collect();

    let mut file = store.load_best()?;
    let mut tracker = BestPriceTracker::new(std::mem::take(&mut file.by_route));
    let removed = tracker.retain_keys(&keep);
    for key in &removed {
        tracing::info!(route = %key, run_id = %run_id, "pruned best record not seen in last run");
    }
    if !removed.is_empty() {
        save(store, file, tracker)?;
    }
    Ok(removed)
}
