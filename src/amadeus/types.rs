use crate::feed::types::SearchQuery;
use serde::Deserialize;
use std::time::Duration;

pub const TOKEN_PATH: &str = "/v1/security/oauth2/token";
pub const SEARCH_PATH: &str = "/v2/shopping/flight-offers";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

fn default_expires_in() -> u64 {
    1799
}

/// Query string for `GET /v2/shopping/flight-offers`.
pub fn search_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("originLocationCode", query.origin.clone()),
        ("destinationLocationCode", query.destination.clone()),
        ("departureDate", query.departure_date.format("%Y-%m-%d").to_string()),
        ("returnDate", query.return_date.format("%Y-%m-%d").to_string()),
        ("adults", query.adults.to_string()),
    ];
    if query.children > 0 {
        params.push(("children", query.children.to_string()));
    }
    params.push(("travelClass", query.cabin.clone()));
    params.push(("currencyCode", query.currency.clone()));
    // Direct-only is enforced by the local stop filter, not by `nonStop`.
    params.push(("max", query.max_results.to_string()));
    params
}

/// `Retry-After` as delta-seconds or an HTTP date. Dates in the past give zero.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
