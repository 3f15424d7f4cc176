//! Price alerts: recomputed every run from the current pick and the best
//! price known before this run. Not deduplicated across runs.

use crate::config::WatchConfig;
use crate::feed::offer::Offer;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TargetPrice,
    PercentDrop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub kind: AlertKind,
    pub route_key: String,
    pub route_id: String,
    pub current_price: f64,
    /// Target price, or the configured drop percentage.
    pub threshold: f64,
    /// Previous best, for percent-drop alerts.
    #[serde(default)]
    pub baseline: Option<f64>,
    /// `target - current` for target alerts, drop percentage for percent-drop.
    pub delta: f64,
    pub carrier: String,
    pub stops: u32,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub currency: String,
    pub message: String,
}

/// Percentage drop from `previous` to `current`. `None` when there is no
/// meaningful baseline.
pub fn drop_percent(previous: f64, current: f64) -> Option<f64> {
    if !previous.is_finite() || previous <= 0.0 || !current.is_finite() {
        return None;
    }
    Some((previous - current) / previous * 100.0)
}

pub fn evaluate(
    route_key: &str,
    watch: &WatchConfig,
    pick: &Offer,
    previous_best: Option<f64>,
) -> Vec<AlertRecord> {
    let mut alerts = Vec::new();
    let current = pick.canonical.price_total;
    let currency = &pick.instance.currency;

    if let Some(target) = watch.target_price {
        if current <= target {
            alerts.push(alert(
                AlertKind::TargetPrice,
                route_key,
                pick,
                target,
                None,
                target - current,
                format!(
                    "{:.2} {} is at or below the target of {:.2} {}",
                    current, currency, target, currency
                ),
            ));
        }
    }

    if let (Some(pct), Some(previous)) = (watch.drop_pct, previous_best) {
        if let Some(drop) = drop_percent(previous, current) {
            if drop >= pct {
                alerts.push(alert(
                    AlertKind::PercentDrop,
                    route_key,
                    pick,
                    pct,
                    Some(previous),
                    drop,
                    format!(
                        "{:.2} {} is {:.1}% below the previous best of {:.2} {}",
                        current, currency, drop, previous, currency
                    ),
                ));
            }
        }
    }

    alerts
}

fn alert(
    kind: AlertKind,
    route_key: &str,
    pick: &Offer,
    threshold: f64,
    baseline: Option<f64>,
    delta: f64,
    detail: String,
) -> AlertRecord {
    let i = &pick.instance;
    let c = &pick.canonical;
    AlertRecord {
        kind,
        route_key: route_key.to_string(),
        route_id: i.route_id.clone(),
        current_price: c.price_total,
        threshold,
        baseline,
        delta,
        carrier: c.carrier.clone(),
        stops: c.stops,
        departure_date: i.departure_date,
        return_date: i.return_date,
        currency: i.currency.clone(),
        message: format!(
            "{} {}->{} {}/{} ({}, {} stop(s)): {}",
            i.route_id,
            i.origin,
            i.destination,
            i.departure_date,
            i.return_date,
            c.carrier,
            c.stops,
            detail
        ),
    }
}
