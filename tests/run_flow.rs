// End-to-end runs against a scripted API and a temporary data directory

mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use chrono::Utc;
    use fare_watch::config::{StorageConfig, WatchConfig};
    use fare_watch::engine::alerts::{AlertKind, AlertRecord};
    use fare_watch::engine::tracker::{BestNote, BestRecord};
    use fare_watch::engine::{Selection, StopReason};
    use fare_watch::route::{DateSource, RouteSpec, ROUTE_KEY_VERSION};
    use fare_watch::stats::RunStats;
    use fare_watch::store::{AlertFeed, BestFile, Outcome, Store};
    use fare_watch::{maintenance, RunCoordinator, RunReport};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Store {
        Store::new(StorageConfig::in_dir(dir.path()))
    }

    async fn run(
        dir: &TempDir,
        specs: Vec<RouteSpec>,
        api: FakeApi,
        settings: fare_watch::feed::client::ClientSettings,
        run_id: &str,
    ) -> RunReport {
        RunCoordinator::with_parts(specs, settings, StorageConfig::in_dir(dir.path()), api)
            .today(date(2026, 10, 16))
            .run_id(run_id)
            .run()
            .await
            .unwrap()
    }

    fn watched(target: f64, drop: f64) -> Option<WatchConfig> {
        Some(WatchConfig {
            target_price: Some(target),
            drop_pct: Some(drop),
            ..WatchConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_price_is_monotonic_across_runs() {
        let dir = TempDir::new().unwrap();
        let spec = fixed_route("gru-fco", "FCO", date(2026, 11, 6), None);
        let key = spec.route_key();

        let mut seen = Vec::new();
        for (n, price) in [500.0, 700.0, 300.0, 300.0, 800.0].into_iter().enumerate() {
            let api = FakeApi::new(vec![ok(&[(price, "AZ", 1)])]);
            let report = run(&dir, vec![spec.clone()], api, settings(), &format!("run-{}", n)).await;
            seen.push(report.best[&key].price_total.unwrap());
        }
        assert_eq!(seen, vec![500.0, 500.0, 300.0, 300.0, 300.0]);

        let on_disk = store(&dir).load_best().unwrap();
        assert_eq!(on_disk.key_version, ROUTE_KEY_VERSION);
        assert_eq!(on_disk.by_route[&key].price_total, Some(300.0));
        assert_eq!(on_disk.by_route[&key].run_id, "run-2");
        assert_eq!(on_disk.run_id.as_deref(), Some("run-4"));
        assert_eq!(store(&dir).read_history().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_stops_run_and_keeps_best_map() {
        let dir = TempDir::new().unwrap();
        let specs: Vec<RouteSpec> = ["FCO", "LIS", "MAD", "CDG", "LHR"]
            .iter()
            .enumerate()
            .map(|(n, dest)| {
                fixed_route(&format!("r{}", n), dest, date(2026, 11, 6 + n as u32), None)
            })
            .collect();

        // Prior state that must survive untouched.
        let s = store(&dir);
        let mut prior = BestFile::default();
        let seeded = BestRecord {
            price_total: Some(4200.0),
            price_base: Some(3500.0),
            carrier: Some("AZ".to_string()),
            stops: Some(1),
            note: None,
            ..BestRecord::unpriced("r0", "BRL", BestNote::NoOffersReturned, "old", Utc::now())
        };
        prior.by_route.insert(specs[0].route_key(), seeded.clone());
        s.save_best(&prior).unwrap();

        let mut cfg = settings();
        cfg.max_attempts = 1;
        cfg.rate_limit_abort_threshold = 3;
        let api = FakeApi::new(vec![status(429), status(429), status(429), ok(&[(1.0, "LA", 1)])]);
        let report = run(&dir, specs, api.clone(), cfg, "breaker").await;

        assert_eq!(report.stop, Some(StopReason::RateLimit));
        assert_eq!(api.queries().len(), 3);
        assert_eq!(report.stats.instances_total, 5);
        assert_eq!(report.stats.instances_queried, 3);
        assert_eq!(report.stats.calls_error, 3);
        assert_eq!(report.stats.rate_limited, 3);
        assert!(report.stats.aborted.is_some());
        assert!(matches!(report.routes[3].selection, Selection::NotQueried));
        assert!(matches!(report.routes[0].selection, Selection::AllCallsFailed));

        let after = s.load_best().unwrap();
        assert_eq!(after.by_route, prior.by_route);
        assert_eq!(after.by_route.values().next(), Some(&seeded));

        let history = s.read_history().unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|h| h.outcome == Outcome::Error));

        let summary = std::fs::read_to_string(s.summary_path()).unwrap();
        assert!(summary.contains("rate-limit circuit breaker tripped"));
        assert!(summary.contains("not queried"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alerts_compare_against_best_before_this_run() {
        let dir = TempDir::new().unwrap();
        let spec = fixed_route("gru-fco", "FCO", date(2026, 11, 6), watched(1000.0, 10.0));

        let first = run(&dir, vec![spec.clone()], FakeApi::new(vec![ok(&[(1200.0, "AZ", 1)])]), settings(), "a").await;
        assert!(first.alerts.is_empty());

        let second = run(&dir, vec![spec.clone()], FakeApi::new(vec![ok(&[(950.0, "AZ", 1)])]), settings(), "b").await;
        let kinds: Vec<AlertKind> = second.alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::TargetPrice, AlertKind::PercentDrop]);
        let drop = &second.alerts[1];
        assert_eq!(drop.baseline, Some(1200.0));
        assert!((drop.delta - 20.833).abs() < 0.01);

        // Still under target: fires again, the feed is a status feed.
        let third = run(&dir, vec![spec], FakeApi::new(vec![ok(&[(990.0, "AZ", 1)])]), settings(), "c").await;
        let kinds: Vec<AlertKind> = third.alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::TargetPrice]);

        let raw = std::fs::read_to_string(store(&dir).alerts_path()).unwrap();
        let feed: AlertFeed = serde_json::from_str(&raw).unwrap();
        assert_eq!(feed.run_id, "c");
        assert_eq!(feed.alerts.len(), 1);
        let alert: &AlertRecord = &feed.alerts[0];
        assert_eq!(alert.current_price, 990.0);
        assert_eq!(alert.carrier, "AZ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failures_still_pick_and_persist() {
        let dir = TempDir::new().unwrap();
        let mut spec = fixed_route("gru-south", "CWB", date(2026, 10, 23), None);
        spec.destinations = vec!["CWB".to_string(), "FLN".to_string()];
        spec.watch = Some(WatchConfig {
            max_stops: Some(0),
            ..WatchConfig::default()
        });

        let mut cfg = settings();
        cfg.max_attempts = 2;
        let api = FakeApi::new(vec![
            status(500),
            status(503),
            ok(&[(650.0, "G3", 2), (700.0, "AD", 1)]),
        ]);
        let report = run(&dir, vec![spec.clone()], api.clone(), cfg, "partial").await;

        let queries = api.queries();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].destination, "CWB");
        assert_eq!(queries[2].destination, "FLN");

        let route = &report.routes[0];
        assert_eq!((route.queried, route.succeeded, route.failed), (2, 1, 1));
        let pick = route.selection.offer().unwrap();
        assert_eq!(pick.canonical.carrier, "AD");
        assert_eq!(pick.instance.destination, "FLN");
        assert!(route.first_error.as_deref().unwrap().contains("503"));

        let stats: RunStats =
            serde_json::from_str(&std::fs::read_to_string(store(&dir).stats_path()).unwrap()).unwrap();
        assert_eq!(stats.calls_ok, 1);
        assert_eq!(stats.calls_error, 1);
        assert_eq!(stats.offers_saved, 2);
        assert_eq!(stats.retries, 1);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_offers_and_no_eligible_offers_are_recorded() {
        let dir = TempDir::new().unwrap();
        let empty = fixed_route("empty", "FCO", date(2026, 11, 6), None);
        let mut direct = fixed_route("direct", "LIS", date(2026, 11, 6), None);
        direct.direct_only = true;

        let api = FakeApi::new(vec![ok(&[]), ok(&[(900.0, "TP", 2)])]);
        let report = run(&dir, vec![empty.clone(), direct.clone()], api, settings(), "notes").await;

        assert_eq!(report.best[&empty.route_key()].note, Some(BestNote::NoOffersReturned));
        assert_eq!(report.best[&direct.route_key()].note, Some(BestNote::NoEligibleOffers));
        assert!(report.best[&direct.route_key()].price_total.is_none());

        // A later priced run fills the unknown record.
        let api = FakeApi::new(vec![ok(&[(1500.0, "AZ", 1)]), ok(&[(999.0, "TP", 2)])]);
        let report = run(&dir, vec![empty.clone(), direct.clone()], api, settings(), "later").await;
        assert_eq!(report.best[&empty.route_key()].price_total, Some(1500.0));
        assert_eq!(report.best[&empty.route_key()].note, None);
        assert_eq!(report.best[&direct.route_key()].note, Some(BestNote::NoEligibleOffers));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_stops_run_and_persists() {
        let dir = TempDir::new().unwrap();
        let specs = vec![
            fixed_route("a", "FCO", date(2026, 11, 6), None),
            fixed_route("b", "LIS", date(2026, 11, 6), None),
        ];
        let api = FakeApi {
            reject_token: true,
            ..FakeApi::new(vec![ok(&[(100.0, "AZ", 1)])])
        };
        let report = run(&dir, specs, api.clone(), settings(), "auth").await;

        assert!(matches!(report.stop, Some(StopReason::Auth(_))));
        assert!(api.queries().is_empty());
        assert_eq!(report.stats.instances_queried, 1);
        assert!(report.best.is_empty());
        assert!(store(&dir).summary_path().exists());
        assert!(store(&dir).stats_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_rule_route_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut odd = fixed_route("odd", "FCO", date(2026, 11, 6), None);
        odd.dates = DateSource::Rule(fare_watch::engine::rules::DateRule::Unrecognized("lunar".to_string()));
        let normal = fixed_route("normal", "LIS", date(2026, 11, 6), None);

        let api = FakeApi::new(vec![ok(&[(800.0, "TP", 1)])]);
        let report = run(&dir, vec![odd.clone(), normal.clone()], api, settings(), "skip").await;
        assert!(report.stop.is_none());
        assert!(!report.best.contains_key(&odd.route_key()));
        assert_eq!(report.best[&normal.route_key()].price_total, Some(800.0));

        let summary = std::fs::read_to_string(store(&dir).summary_path()).unwrap();
        assert!(summary.contains("no date pairs to query"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_reset_and_prune() {
        let dir = TempDir::new().unwrap();
        let a = fixed_route("a", "FCO", date(2026, 11, 6), None);
        let b = fixed_route("b", "LIS", date(2026, 11, 6), None);

        run(&dir, vec![a.clone(), b.clone()], FakeApi::new(vec![ok(&[(500.0, "AZ", 1)]), ok(&[(400.0, "TP", 1)])]), settings(), "one").await;
        run(&dir, vec![a.clone()], FakeApi::new(vec![ok(&[(600.0, "AZ", 1)])]), settings(), "two").await;

        let s = store(&dir);
        assert_eq!(s.load_best().unwrap().by_route.len(), 2);

        let removed = maintenance::prune_to_last_run(&s).unwrap();
        assert_eq!(removed, vec![b.route_key()]);
        assert_eq!(s.load_best().unwrap().by_route.len(), 1);

        assert!(maintenance::reset_route(&s, &a.route_key()).unwrap());
        assert!(!maintenance::reset_route(&s, &a.route_key()).unwrap());
        assert!(s.load_best().unwrap().by_route.is_empty());

        // After a reset a higher price is accepted again.
        let report = run(&dir, vec![a.clone()], FakeApi::new(vec![ok(&[(650.0, "AZ", 1)])]), settings(), "three").await;
        assert_eq!(report.best[&a.route_key()].price_total, Some(650.0));
    }
}
