use crate::config::WatchConfig;
use crate::engine::rules::DateRule;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bumped whenever the route_key layout changes. Persisted best-price files
/// written under another version are archived instead of reused.
pub const ROUTE_KEY_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pax {
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
}

fn default_adults() -> u32 {
    1
}

impl Default for Pax {
    fn default() -> Self {
        Self {
            adults: 1,
            children: 0,
        }
    }
}

/// Where a route's travel dates come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DateSource {
    Fixed {
        departure: NaiveDate,
        return_date: NaiveDate,
    },
    Rule(DateRule),
}

impl DateSource {
    fn descriptor(&self) -> String {
        match self {
            DateSource::Fixed {
                departure,
                return_date,
            } => format!("fixed;{};{}", departure, return_date),
            DateSource::Rule(rule) => rule.descriptor(),
        }
    }
}

/// A validated monitoring target. Built once from configuration, immutable
/// for the rest of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    pub id: String,
    pub name: Option<String>,
    pub origin: String,
    pub destinations: Vec<String>,
    pub pax: Pax,
    pub cabin: String,
    pub currency: String,
    pub direct_only: bool,
    pub dates: DateSource,
    pub watch: Option<WatchConfig>,
}

impl RouteSpec {
    /// Stable identifier for all persisted state of this route.
    ///
    /// `{ID}:A{adults}C{children}:{CABIN}:{CURRENCY}:{fingerprint}` where the
    /// fingerprint hashes everything that changes what is being watched
    /// (airports, direct-only flag, explicit dates or rule parameters).
    pub fn route_key(&self) -> String {
        format!(
            "{}:A{}C{}:{}:{}:{}",
            self.id.to_uppercase(),
            self.pax.adults,
            self.pax.children,
            self.cabin.to_uppercase(),
            self.currency.to_uppercase(),
            self.fingerprint()
        )
    }

    fn fingerprint(&self) -> String {
        let raw = format!(
            "v{}|{}|{}|direct={}|{}",
            ROUTE_KEY_VERSION,
            self.origin.to_uppercase(),
            self.destinations
                .iter()
                .map(|d| d.to_uppercase())
                .collect::<Vec<_>>()
                .join(","),
            self.direct_only,
            self.dates.descriptor()
        );
        let digest = Sha256::digest(raw.as_bytes());
        hex::encode(digest)[..10].to_string()
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One concrete date pair to query. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInstance {
    pub route_id: String,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub pax: Pax,
    pub cabin: String,
    pub currency: String,
    pub direct_only: bool,
}

impl RouteInstance {
    /// Short request context used in logs and error samples.
    pub fn describe(&self) -> String {
        format!(
            "{} {}->{} {}/{}",
            self.route_id, self.origin, self.destination, self.departure_date, self.return_date
        )
    }
}
