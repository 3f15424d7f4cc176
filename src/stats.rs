use crate::engine::runner::RouteOutcome;
use crate::feed::client::CallStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written once per run, for observability only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: String,
    pub started_utc: DateTime<Utc>,
    pub duration_ms: u64,
    pub instances_total: usize,
    pub instances_queried: usize,
    pub calls_total: usize,
    pub calls_ok: usize,
    pub calls_error: usize,
    pub http_requests: u64,
    pub retries: u64,
    pub reauths: u64,
    pub rate_limited: u64,
    pub offers_saved: usize,
    pub alerts: usize,
    pub aborted: Option<String>,
    pub success_rate: f64,
}

impl RunStats {
    pub fn compute(
        run_id: &str,
        started_utc: DateTime<Utc>,
        duration_ms: u64,
        outcomes: &[RouteOutcome],
        calls: CallStats,
        alerts: usize,
        aborted: Option<String>,
    ) -> Self {
        let sum = |f: fn(&RouteOutcome) -> usize| outcomes.iter().map(f).sum::<usize>();
        let instances_total = sum(|o| o.instances_total);
        let queried = sum(|o| o.queried);
        let ok = sum(|o| o.succeeded);
        let error = sum(|o| o.failed);
        let success_rate = if queried == 0 {
            0.0
        } else {
            ok as f64 / queried as f64
        };
        Self {
            run_id: run_id.to_string(),
            started_utc,
            duration_ms,
            instances_total,
            instances_queried: queried,
            calls_total: queried,
            calls_ok: ok,
            calls_error: error,
            http_requests: calls.http_requests,
            retries: calls.retries,
            reauths: calls.reauths,
            rate_limited: calls.rate_limited,
            offers_saved: sum(|o| o.offers.len()),
            alerts,
            aborted,
            success_rate,
        }
    }
}
