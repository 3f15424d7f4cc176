use crate::route::RouteInstance;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

/// Bearer token handed out by the credential exchange.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: Duration,
}

/// One offer search, provider-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub adults: u32,
    pub children: u32,
    pub cabin: String,
    pub currency: String,
    pub direct_only: bool,
    pub max_results: u32,
}

impl SearchQuery {
    pub fn from_instance(instance: &RouteInstance, max_results: u32) -> Self {
        Self {
            origin: instance.origin.clone(),
            destination: instance.destination.clone(),
            departure_date: instance.departure_date,
            return_date: instance.return_date,
            adults: instance.pax.adults,
            children: instance.pax.children,
            cabin: instance.cabin.clone(),
            currency: instance.currency.clone(),
            direct_only: instance.direct_only,
            max_results,
        }
    }
}

/// HTTP response as seen by the retry protocol.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed `Retry-After` hint, when the server sent one.
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Search response body: `{"data": [...]}` or a bare array of offers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OffersPayload {
    Bare(Vec<serde_json::Value>),
    Wrapped {
        #[serde(default)]
        data: Vec<serde_json::Value>,
    },
}

impl OffersPayload {
    pub fn into_values(self) -> Vec<serde_json::Value> {
        match self {
            OffersPayload::Wrapped { data } => data,
            OffersPayload::Bare(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Short human message for an error response body.
/// Uses `errors[0].detail`/`title` when present, otherwise the truncated body.
pub fn summarize_error_body(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(entry) = parsed.errors.first() {
            let text = match (&entry.title, &entry.detail) {
                (Some(t), Some(d)) => format!("{}: {}", t, d),
                (Some(t), None) => t.clone(),
                (None, Some(d)) => d.clone(),
                (None, None) => String::new(),
            };
            if !text.is_empty() {
                return text;
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}...", trimmed.chars().take(200).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
