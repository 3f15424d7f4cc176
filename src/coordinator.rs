use crate::config::{Config, StorageConfig};
use crate::diagnostic::{build_diagnostic_rows, DiagnosticRow};
use crate::engine::alerts::{self, AlertRecord};
use crate::engine::runner::{RouteRunner, Selection, StopReason};
use crate::engine::tracker::{BestNote, BestPriceTracker, BestRecord, Transition};
use crate::feed::client::{ClientSettings, FlightQueryClient};
use crate::feed::FlightApi;
use crate::report;
use crate::route::{RouteSpec, ROUTE_KEY_VERSION};
use crate::stats::RunStats;
use crate::store::{AlertFeed, BestFile, HistoryRecord, Store};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Per-route result of one run.
#[derive(Debug, Clone)]
pub struct RouteReport {
    pub route_key: String,
    pub route_id: String,
    pub label: String,
    pub currency: String,
    pub instances_total: usize,
    pub queried: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub selection: Selection,
    /// Best price known before this run's tracker write.
    pub previous_best: Option<f64>,
    /// `None` when nothing was offered to the tracker.
    pub transition: Option<Transition>,
    pub first_error: Option<String>,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub started_utc: DateTime<Utc>,
    pub stop: Option<StopReason>,
    pub routes: Vec<RouteReport>,
    pub alerts: Vec<AlertRecord>,
    pub best: BTreeMap<String, BestRecord>,
    pub stats: RunStats,
}

impl RunReport {
    pub fn diagnostics(&self) -> Vec<DiagnosticRow> {
        build_diagnostic_rows(&self.routes)
    }

    /// Description of why the run ended early, if it did.
    pub fn abort_reason(&self) -> Option<String> {
        self.stop.as_ref().map(StopReason::describe)
    }
}

/// Runs one monitoring pass: query, select, track, alert, persist.
/// All state lives in the injected config and the data directory.
pub struct RunCoordinator<A> {
    specs: Vec<RouteSpec>,
    settings: ClientSettings,
    store: Store,
    api: A,
    today: NaiveDate,
    run_id: String,
}

impl<A: FlightApi> RunCoordinator<A> {
    pub fn new(config: &Config, specs: Vec<RouteSpec>, api: A) -> Self {
        Self::with_parts(
            specs,
            ClientSettings::from_config(config),
            config.storage.clone(),
            api,
        )
    }

    pub fn with_parts(
        specs: Vec<RouteSpec>,
        settings: ClientSettings,
        storage: StorageConfig,
        api: A,
    ) -> Self {
        Self {
            specs,
            settings,
            store: Store::new(storage),
            api,
            today: chrono::Local::now().date_naive(),
            run_id: Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
        }
    }

    pub fn today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub async fn run(self) -> Result<RunReport> {
        let started_utc = Utc::now();
        let clock = std::time::Instant::now();
        let run_id = self.run_id;
        let store = self.store;

        // Read the whole prior state before querying anything.
        let prior = store.load_best()?;
        let mut tracker = BestPriceTracker::new(prior.by_route);
        tracing::info!(
            run_id = %run_id,
            routes = self.specs.len(),
            known = tracker.len(),
            "starting run"
        );

        let client = FlightQueryClient::new(self.api, self.settings);
        let mut runner = RouteRunner::new(client, self.today);
        let output = runner.run(&self.specs).await;

        let now = Utc::now();
        let mut routes = Vec::with_capacity(output.outcomes.len());
        let mut alert_list = Vec::new();
        let mut history = Vec::new();
        for outcome in &output.outcomes {
            let key = &outcome.route_key;
            let previous_best = tracker.best_price(key);
            let selection = outcome.selection();

            let candidate = match &selection {
                Selection::Picked(offer) => Some(BestRecord::from_offer(offer, &run_id, now)),
                Selection::NoOffersReturned => Some(BestRecord::unpriced(
                    &outcome.spec.id,
                    &outcome.spec.currency,
                    BestNote::NoOffersReturned,
                    &run_id,
                    now,
                )),
                Selection::NoEligibleOffers => Some(BestRecord::unpriced(
                    &outcome.spec.id,
                    &outcome.spec.currency,
                    BestNote::NoEligibleOffers,
                    &run_id,
                    now,
                )),
                Selection::AllCallsFailed | Selection::NotQueried => None,
            };
            let transition = candidate.map(|c| tracker.observe(key, c));
            if let Some(t) = transition {
                tracing::debug!(route = %key, transition = ?t, "tracker updated");
            }

            if let (Some(watch), Selection::Picked(offer)) = (&outcome.spec.watch, &selection) {
                alert_list.extend(alerts::evaluate(key, watch, offer, previous_best));
            }

            history.extend(
                outcome
                    .events
                    .iter()
                    .map(|e| HistoryRecord::from_event(&run_id, key, e)),
            );

            routes.push(RouteReport {
                route_key: key.clone(),
                route_id: outcome.spec.id.clone(),
                label: outcome.spec.label().to_string(),
                currency: outcome.spec.currency.clone(),
                instances_total: outcome.instances_total,
                queried: outcome.queried,
                succeeded: outcome.succeeded,
                failed: outcome.failed,
                selection,
                previous_best,
                transition,
                first_error: outcome.first_error.clone(),
            });
        }

        for alert in &alert_list {
            tracing::info!(route = %alert.route_key, kind = ?alert.kind, "{}", alert.message);
        }

        let stats = RunStats::compute(
            &run_id,
            started_utc,
            clock.elapsed().as_millis() as u64,
            &output.outcomes,
            output.stats,
            alert_list.len(),
            output.stop.as_ref().map(StopReason::describe),
        );
        let report = RunReport {
            run_id: run_id.clone(),
            started_utc,
            stop: output.stop,
            routes,
            alerts: alert_list,
            best: tracker.into_records(),
            stats,
        };

        persist(&store, &report, &history)?;
        tracing::info!(
            run_id = %run_id,
            queried = report.stats.instances_queried,
            ok = report.stats.calls_ok,
            errors = report.stats.calls_error,
            alerts = report.alerts.len(),
            aborted = report.stop.is_some(),
            "run finished"
        );
        Ok(report)
    }
}

/// Write every output, attempting all of them before reporting a failure.
fn persist(store: &Store, report: &RunReport, history: &[HistoryRecord]) -> Result<()> {
    let best = BestFile {
        key_version: ROUTE_KEY_VERSION,
        run_id: Some(report.run_id.clone()),
        updated_utc: Some(Utc::now()),
        by_route: report.best.clone(),
    };
    let feed = AlertFeed {
        run_id: report.run_id.clone(),
        generated_utc: Utc::now(),
        alerts: report.alerts.clone(),
    };
    let summary = report::render_summary(report);

    let results = [
        ("history", store.append_history(history)),
        ("best prices", store.save_best(&best)),
        ("alerts", store.write_alerts(&feed)),
        ("run stats", store.write_stats(&report.stats)),
        ("summary", store.write_summary(&summary)),
    ];
    let mut failed = Vec::new();
    for (what, result) in results {
        if let Err(e) = result {
            tracing::error!(output = what, error = %format!("{:#}", e), "failed to persist");
            failed.push(what);
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("failed to persist: {}", failed.join(", "));
    }
    Ok(())
}
