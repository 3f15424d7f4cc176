use crate::feed::offer::Offer;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Why a record carries no price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestNote {
    NoOffersReturned,
    NoEligibleOffers,
}

/// Lowest known offer for one route_key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub route_id: String,
    #[serde(default)]
    pub price_total: Option<f64>,
    #[serde(default)]
    pub price_base: Option<f64>,
    pub currency: String,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub stops: Option<u32>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub departure_date: Option<NaiveDate>,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    pub run_id: String,
    pub updated_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<BestNote>,
}

impl BestRecord {
    pub fn from_offer(offer: &Offer, run_id: &str, now: DateTime<Utc>) -> Self {
        let c = &offer.canonical;
        let i = &offer.instance;
        Self {
            route_id: i.route_id.clone(),
            price_total: Some(c.price_total),
            price_base: Some(c.price_base),
            currency: i.currency.clone(),
            carrier: Some(c.carrier.clone()),
            stops: Some(c.stops),
            origin: Some(i.origin.clone()),
            destination: Some(i.destination.clone()),
            departure_date: Some(i.departure_date),
            return_date: Some(i.return_date),
            run_id: run_id.to_string(),
            updated_utc: now,
            note: None,
        }
    }

    /// A priceless record explaining why nothing was picked.
    pub fn unpriced(
        route_id: &str,
        currency: &str,
        note: BestNote,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            route_id: route_id.to_string(),
            price_total: None,
            price_base: None,
            currency: currency.to_string(),
            carrier: None,
            stops: None,
            origin: None,
            destination: None,
            departure_date: None,
            return_date: None,
            run_id: run_id.to_string(),
            updated_utc: now,
            note: Some(note),
        }
    }
}

/// What [`BestPriceTracker::observe`] did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// No prior record, candidate stored as-is.
    Created,
    /// Candidate undercut the prior price.
    Lowered { previous: f64 },
    /// Prior record had no price, candidate has one.
    Filled,
    /// Prior record stays.
    Kept,
}

impl Transition {
    pub fn wrote(&self) -> bool {
        !matches!(self, Transition::Kept)
    }
}

/// Persisted route_key -> BestRecord map with a monotonic non-increasing
/// price per key. Only [`BestPriceTracker::reset`] and
/// [`BestPriceTracker::retain_keys`] remove records.
#[derive(Debug, Clone, Default)]
pub struct BestPriceTracker {
    records: BTreeMap<String, BestRecord>,
}

impl BestPriceTracker {
    pub fn new(records: BTreeMap<String, BestRecord>) -> Self {
        Self { records }
    }

    pub fn get(&self, route_key: &str) -> Option<&BestRecord> {
        self.records.get(route_key)
    }

    /// Known best price for a key, if any.
    pub fn best_price(&self, route_key: &str) -> Option<f64> {
        self.records.get(route_key).and_then(|r| r.price_total)
    }

    pub fn records(&self) -> &BTreeMap<String, BestRecord> {
        &self.records
    }

    pub fn into_records(self) -> BTreeMap<String, BestRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn observe(&mut self, route_key: &str, candidate: BestRecord) -> Transition {
        let Some(prior) = self.records.get(route_key) else {
            self.records.insert(route_key.to_string(), candidate);
            return Transition::Created;
        };
        let transition = match (prior.price_total, candidate.price_total) {
            (Some(old), Some(new)) if new < old => Transition::Lowered { previous: old },
            (None, Some(_)) => Transition::Filled,
            _ => Transition::Kept,
        };
        if transition.wrote() {
            self.records.insert(route_key.to_string(), candidate);
        }
        transition
    }

    /// Drop one record. Maintenance only.
    pub fn reset(&mut self, route_key: &str) -> Option<BestRecord> {
        self.records.remove(route_key)
    }

    /// Keep only the given keys, returning the removed ones.
    pub fn retain_keys(&mut self, keep: &HashSet<String>) -> Vec<String> {
        let removed: Vec<String> = self
            .records
            .keys()
            .filter(|k| !keep.contains(*k))
            .cloned()
            .collect();
        for key in &removed {
            self.records.remove(key);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(price: Option<f64>, run: &str) -> BestRecord {
        let now = Utc::now();
        match price {
            Some(p) => BestRecord {
                price_total: Some(p),
                price_base: Some(p * 0.8),
                carrier: Some("LA".to_string()),
                stops: Some(0),
                note: None,
                ..BestRecord::unpriced("gru-fco", "BRL", BestNote::NoOffersReturned, run, now)
            },
            None => BestRecord::unpriced("gru-fco", "BRL", BestNote::NoOffersReturned, run, now),
        }
    }

    #[test]
    fn test_monotonic_across_runs() {
        let mut tracker = BestPriceTracker::default();
        let mut seen = Vec::new();
        for (i, price) in [500.0, 700.0, 300.0, 300.0, 800.0].into_iter().enumerate() {
            tracker.observe("K", record(Some(price), &format!("run-{}", i)));
            seen.push(tracker.best_price("K").unwrap());
        }
        assert_eq!(seen, vec![500.0, 500.0, 300.0, 300.0, 300.0]);
        // The equal price in run 3 does not replace the run 2 record.
        assert_eq!(tracker.get("K").unwrap().run_id, "run-2");
    }

    #[test]
    fn test_transitions() {
        let mut tracker = BestPriceTracker::default();
        assert_eq!(tracker.observe("K", record(None, "a")), Transition::Created);
        assert_eq!(tracker.get("K").unwrap().note, Some(BestNote::NoOffersReturned));
        assert_eq!(tracker.observe("K", record(None, "b")), Transition::Kept);
        assert_eq!(tracker.get("K").unwrap().run_id, "a");
        assert_eq!(tracker.observe("K", record(Some(900.0), "c")), Transition::Filled);
        assert_eq!(
            tracker.observe("K", record(Some(850.0), "d")),
            Transition::Lowered { previous: 900.0 }
        );
        // Known is never demoted to unknown.
        assert_eq!(tracker.observe("K", record(None, "e")), Transition::Kept);
        assert_eq!(tracker.best_price("K"), Some(850.0));
    }

    #[test]
    fn test_reset_and_retain() {
        let mut tracker = BestPriceTracker::default();
        tracker.observe("A", record(Some(1.0), "r"));
        tracker.observe("B", record(Some(2.0), "r"));
        tracker.observe("C", record(Some(3.0), "r"));

        assert!(tracker.reset("A").is_some());
        assert!(tracker.reset("A").is_none());
        // After a reset the next observation starts fresh, even if higher.
        assert_eq!(tracker.observe("A", record(Some(10.0), "s")), Transition::Created);

        let keep: HashSet<String> = ["B".to_string()].into_iter().collect();
        let mut removed = tracker.retain_keys(&keep);
        removed.sort();
        assert_eq!(removed, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_record_serde_shape() {
        let json = serde_json::to_value(record(None, "r")).unwrap();
        assert_eq!(json["note"], "no_offers_returned");
        assert!(json["price_total"].is_null());
        let json = serde_json::to_value(record(Some(5.0), "r")).unwrap();
        assert!(json.get("note").is_none());
    }
}
