use crate::engine::rules::DateRule;
use crate::route::{DateSource, Pax, RouteSpec};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_FILE: &str = ".env";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiEnvironment {
    #[default]
    #[serde(alias = "sandbox")]
    Test,
    Production,
}

impl ApiEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            ApiEnvironment::Test => "https://test.api.amadeus.com",
            ApiEnvironment::Production => "https://api.amadeus.com",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "test" | "sandbox" => Ok(ApiEnvironment::Test),
            "production" | "prod" => Ok(ApiEnvironment::Production),
            other => anyhow::bail!("unknown API environment {:?}", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub environment: ApiEnvironment,
    /// Full base URL override (mock servers, proxies). Wins over `environment`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Seconds subtracted from the token lifetime before it is considered expired.
    #[serde(default = "default_token_margin_s")]
    pub token_safety_margin_s: u64,
}

fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_token_margin_s() -> u64 { 60 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: ApiEnvironment::default(),
            base_url: None,
            request_timeout_ms: default_request_timeout_ms(),
            token_safety_margin_s: default_token_margin_s(),
        }
    }
}

impl ApiConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(self.environment.base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Fixed pause after every search call, whatever its outcome.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Extra random fraction of the backoff delay, 0.0 disables jitter.
    #[serde(default)]
    pub backoff_jitter: f64,
    /// Consecutive 429s across the whole run that stop all further querying.
    #[serde(default = "default_rate_limit_abort")]
    pub rate_limit_abort_threshold: u32,
    /// Restrict the run to a single route id (staged rollout).
    #[serde(default)]
    pub only_route: Option<String>,
}

fn default_max_results() -> u32 { 50 }
fn default_throttle_ms() -> u64 { 250 }
fn default_max_attempts() -> u32 { 4 }
fn default_backoff_base_ms() -> u64 { 1_000 }
fn default_backoff_max_ms() -> u64 { 16_000 }
fn default_rate_limit_abort() -> u32 { 5 }

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            throttle_ms: default_throttle_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter: 0.0,
            rate_limit_abort_threshold: default_rate_limit_abort(),
            only_route: None,
        }
    }
}

impl QueryConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_best_file")]
    pub best_file: String,
    #[serde(default = "default_history_file")]
    pub history_file: String,
    #[serde(default = "default_alerts_file")]
    pub alerts_file: String,
    #[serde(default = "default_summary_file")]
    pub summary_file: String,
    #[serde(default = "default_stats_file")]
    pub stats_file: String,
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_best_file() -> String { "best_offers.json".to_string() }
fn default_history_file() -> String { "history.jsonl".to_string() }
fn default_alerts_file() -> String { "alerts.json".to_string() }
fn default_summary_file() -> String { "summary.md".to_string() }
fn default_stats_file() -> String { "run_stats.json".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            best_file: default_best_file(),
            history_file: default_history_file(),
            alerts_file: default_alerts_file(),
            summary_file: default_summary_file(),
            stats_file: default_stats_file(),
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `dir` with default file names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            ..Self::default()
        }
    }
}

/// Alerting and selection preferences for one route.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct WatchConfig {
    #[serde(default, alias = "target_price_total")]
    pub target_price: Option<f64>,
    #[serde(default, alias = "alert_drop_pct")]
    pub drop_pct: Option<f64>,
    #[serde(default)]
    pub max_stops: Option<u32>,
    #[serde(default, alias = "prefer_airlines")]
    pub prefer_carriers: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    pub name: String,
    #[serde(flatten)]
    pub params: toml::Table,
}

/// A route exactly as written in the config file. Turned into a
/// [`RouteSpec`] by [`RouteConfig::to_spec`].
#[derive(Debug, Deserialize, Clone)]
pub struct RouteConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub origin: String,
    #[serde(default, alias = "destination")]
    pub destinations: OneOrMany,
    #[serde(default)]
    pub pax: Pax,
    #[serde(default = "default_cabin")]
    pub cabin: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub direct_only: bool,
    #[serde(default)]
    pub departure_date: Option<NaiveDate>,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub rule: Option<RuleConfig>,
    #[serde(default)]
    pub watch: Option<WatchConfig>,
}

fn default_cabin() -> String { "ECONOMY".to_string() }
fn default_currency() -> String { "BRL".to_string() }

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
    #[default]
    #[serde(skip)]
    Empty,
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
            OneOrMany::Empty => Vec::new(),
        }
    }
}

impl RouteConfig {
    /// Validate and convert into a RouteSpec. Any error here is fatal at startup.
    pub fn to_spec(&self) -> Result<RouteSpec> {
        let id = self.id.trim();
        if id.is_empty() {
            anyhow::bail!("route with empty id");
        }
        let origin = self.origin.trim().to_uppercase();
        if origin.is_empty() {
            anyhow::bail!("route {}: missing origin", id);
        }
        let destinations: Vec<String> = self
            .destinations
            .clone()
            .into_vec()
            .into_iter()
            .map(|d| d.trim().to_uppercase())
            .filter(|d| !d.is_empty())
            .collect();
        if destinations.is_empty() {
            anyhow::bail!("route {}: no destination", id);
        }
        if self.pax.adults == 0 {
            anyhow::bail!("route {}: at least one adult is required", id);
        }

        let dates = match (&self.rule, self.departure_date, self.return_date) {
            (Some(rule), dep, ret) => {
                if dep.is_some() || ret.is_some() {
                    tracing::warn!(route = id, "route has both explicit dates and a rule; using the rule");
                }
                let rule = DateRule::from_config(&rule.name, rule.params.clone())
                    .with_context(|| format!("route {}", id))?;
                if let DateRule::Unrecognized(name) = &rule {
                    tracing::warn!(route = id, rule = %name, "unrecognized date rule, route will not be queried");
                }
                DateSource::Rule(rule)
            }
            (None, Some(departure), Some(return_date)) => {
                if return_date < departure {
                    anyhow::bail!("route {}: return_date before departure_date", id);
                }
                DateSource::Fixed { departure, return_date }
            }
            (None, Some(_), None) | (None, None, Some(_)) => {
                anyhow::bail!("route {}: departure_date and return_date must be set together", id)
            }
            (None, None, None) => anyhow::bail!("route {}: needs explicit dates or a rule", id),
        };

        Ok(RouteSpec {
            id: id.to_string(),
            name: self.name.clone(),
            origin,
            destinations,
            pax: self.pax,
            cabin: self.cabin.trim().to_uppercase(),
            currency: self.currency.trim().to_uppercase(),
            direct_only: self.direct_only,
            dates,
            watch: self.watch.clone(),
        })
    }
}

/// API credentials exchanged for a bearer token.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config TOML")
    }

    /// Path of the config file: `FARE_WATCH_CONFIG` or `config.toml`.
    pub fn default_path() -> PathBuf {
        match std::env::var("FARE_WATCH_CONFIG") {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(sanitize_key(&p)),
            _ => PathBuf::from("config.toml"),
        }
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for line in content.lines() {
            let line = line.trim().trim_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }

    /// Apply `FLIGHT_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).map(|v| sanitize_key(&v)).filter(|v| !v.is_empty());

        fn num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid value for {}: {:?} ({})", key, raw, e))
        }

        if let Some(v) = get("FLIGHT_API_ENV") {
            self.api.environment = ApiEnvironment::parse(&v)?;
        }
        if let Some(v) = get("FLIGHT_MAX_RESULTS") {
            self.query.max_results = num("FLIGHT_MAX_RESULTS", &v)?;
        }
        if let Some(v) = get("FLIGHT_THROTTLE_MS") {
            self.query.throttle_ms = num("FLIGHT_THROTTLE_MS", &v)?;
        }
        if let Some(v) = get("FLIGHT_MAX_ATTEMPTS") {
            self.query.max_attempts = num("FLIGHT_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("FLIGHT_BACKOFF_BASE_MS") {
            self.query.backoff_base_ms = num("FLIGHT_BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = get("FLIGHT_BACKOFF_MAX_MS") {
            self.query.backoff_max_ms = num("FLIGHT_BACKOFF_MAX_MS", &v)?;
        }
        if let Some(v) = get("FLIGHT_ABORT_429_THRESHOLD") {
            self.query.rate_limit_abort_threshold = num("FLIGHT_ABORT_429_THRESHOLD", &v)?;
        }
        if let Some(v) = get("FLIGHT_ONLY_ROUTE") {
            self.query.only_route = Some(v);
        }
        if let Some(v) = get("FLIGHT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Validate the whole file and build the RouteSpecs for this run,
    /// honoring `only_route`.
    pub fn route_specs(&self) -> Result<Vec<RouteSpec>> {
        if self.query.max_attempts == 0 {
            anyhow::bail!("query.max_attempts must be at least 1");
        }
        if self.query.max_results == 0 {
            anyhow::bail!("query.max_results must be at least 1");
        }
        if self.query.rate_limit_abort_threshold == 0 {
            anyhow::bail!("query.rate_limit_abort_threshold must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.query.backoff_jitter) {
            anyhow::bail!("query.backoff_jitter must be within 0.0..=1.0");
        }

        // Route keys uppercase the id, so ids must be unique ignoring case.
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            let spec = route.to_spec()?;
            if !seen.insert(spec.id.to_uppercase()) {
                anyhow::bail!("duplicate route id {:?}", spec.id);
            }
            specs.push(spec);
        }

        if let Some(only) = &self.query.only_route {
            specs.retain(|s| &s.id == only);
            if specs.is_empty() {
                anyhow::bail!("only_route {:?} matches no configured route", only);
            }
        }
        Ok(specs)
    }

    /// API credentials come from environment variables (or the .env file).
    pub fn credentials() -> Result<Credentials> {
        let read = |key: &str| -> Result<String> {
            match std::env::var(key) {
                Ok(v) if !v.trim().is_empty() => Ok(sanitize_key(&v)),
                _ => anyhow::bail!("{} is not set (environment or .env)", key),
            }
        };
        Ok(Credentials {
            client_id: read("AMADEUS_CLIENT_ID")?,
            client_secret: read("AMADEUS_CLIENT_SECRET")?,
        })
    }
}

/// Strip carriage returns, BOM, and other invisible chars from a key/path value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [api]
        environment = "sandbox"

        [query]
        throttle_ms = 100

        [[routes]]
        id = "gru-fco"
        origin = "gru"
        destination = "fco"
        pax = { adults = 2, children = 1 }
        direct_only = true

        [routes.rule]
        name = "windowed_trip"
        start = "09-01"
        latest_return = "10-05"

        [routes.watch]
        target_price_total = 9000.0
        alert_drop_pct = 10.0

        [[routes]]
        id = "cwb-weekend"
        origin = "GRU"
        destinations = ["CWB", "NVT"]
        departure_date = "2026-11-06"
        return_date = "2026-11-08"
    "#;

    #[test]
    fn test_config_parses() {
        let config = Config::load(Path::new("config.toml")).unwrap();
        let specs = config.route_specs().unwrap();
        assert!(!specs.is_empty());
        assert!(config.query.max_attempts >= 1);
    }

    #[test]
    fn test_sample_routes_convert() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.api.environment, ApiEnvironment::Test);
        assert_eq!(config.query.throttle_ms, 100);
        assert_eq!(config.query.max_attempts, 4);

        let specs = config.route_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].origin, "GRU");
        assert_eq!(specs[0].destinations, vec!["FCO".to_string()]);
        assert_eq!(specs[0].pax, Pax { adults: 2, children: 1 });
        let watch = specs[0].watch.as_ref().unwrap();
        assert_eq!(watch.target_price, Some(9000.0));
        assert_eq!(watch.drop_pct, Some(10.0));
        assert!(matches!(specs[0].dates, DateSource::Rule(DateRule::WindowedTrip(_))));

        assert_eq!(specs[1].destinations, vec!["CWB".to_string(), "NVT".to_string()]);
        assert!(matches!(specs[1].dates, DateSource::Fixed { .. }));
    }

    #[test]
    fn test_only_route_filters_and_rejects_unknown() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.query.only_route = Some("cwb-weekend".to_string());
        let specs = config.route_specs().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "cwb-weekend");

        config.query.only_route = Some("nope".to_string());
        assert!(config.route_specs().is_err());
    }

    #[test]
    fn test_invalid_routes_are_fatal() {
        let missing_dates = r#"
            [[routes]]
            id = "x"
            origin = "GRU"
            destination = "FCO"
        "#;
        assert!(Config::parse(missing_dates).unwrap().route_specs().is_err());

        let half_dates = r#"
            [[routes]]
            id = "x"
            origin = "GRU"
            destination = "FCO"
            departure_date = "2026-11-06"
        "#;
        assert!(Config::parse(half_dates).unwrap().route_specs().is_err());

        let bad_rule = r#"
            [[routes]]
            id = "x"
            origin = "GRU"
            destination = "FCO"
            [routes.rule]
            name = "rolling_weekend"
            depart_weekdays = []
        "#;
        assert!(Config::parse(bad_rule).unwrap().route_specs().is_err());

        let duplicate = r#"
            [[routes]]
            id = "x"
            origin = "GRU"
            destination = "FCO"
            departure_date = "2026-11-06"
            return_date = "2026-11-08"
            [[routes]]
            id = "x"
            origin = "GRU"
            destination = "CWB"
            departure_date = "2026-11-06"
            return_date = "2026-11-08"
        "#;
        assert!(Config::parse(duplicate).unwrap().route_specs().is_err());
    }

    #[test]
    fn test_route_ids_differing_only_in_case_are_rejected() {
        let config = Config::parse(
            r#"
            [[routes]]
            id = "gru-fco"
            origin = "GRU"
            destination = "FCO"
            departure_date = "2026-11-06"
            return_date = "2026-11-20"
            [[routes]]
            id = "GRU-FCO"
            origin = "GRU"
            destination = "FCO"
            departure_date = "2026-11-06"
            return_date = "2026-11-20"
        "#,
        )
        .unwrap();
        let err = config.route_specs().unwrap_err();
        assert!(err.to_string().contains("duplicate route id"), "{}", err);
    }

    #[test]
    fn test_unknown_rule_name_is_not_fatal() {
        let unknown = r#"
            [[routes]]
            id = "x"
            origin = "GRU"
            destination = "FCO"
            [routes.rule]
            name = "full_moon"
        "#;
        let specs = Config::parse(unknown).unwrap().route_specs().unwrap();
        assert_eq!(
            specs[0].dates,
            DateSource::Rule(DateRule::Unrecognized("full_moon".to_string()))
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::parse(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("FLIGHT_API_ENV", "production"),
            ("FLIGHT_THROTTLE_MS", "1500\r"),
            ("FLIGHT_ABORT_429_THRESHOLD", "2"),
            ("FLIGHT_ONLY_ROUTE", "gru-fco"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api.environment, ApiEnvironment::Production);
        assert_eq!(config.query.throttle_ms, 1500);
        assert_eq!(config.query.rate_limit_abort_threshold, 2);
        assert_eq!(config.query.only_route.as_deref(), Some("gru-fco"));

        let bad = |k: &str| (k == "FLIGHT_MAX_ATTEMPTS").then(|| "lots".to_string());
        assert!(config.apply_overrides(bad).is_err());
    }

    #[test]
    fn test_base_url_resolution() {
        let mut api = ApiConfig::default();
        assert_eq!(api.resolved_base_url(), "https://test.api.amadeus.com");
        api.environment = ApiEnvironment::Production;
        assert_eq!(api.resolved_base_url(), "https://api.amadeus.com");
        api.base_url = Some("http://localhost:9999/".to_string());
        assert_eq!(api.resolved_base_url(), "http://localhost:9999");
    }
}
