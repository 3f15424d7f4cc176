// Shared fixtures for integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use fare_watch::config::WatchConfig;
use fare_watch::feed::client::ClientSettings;
use fare_watch::feed::types::{AccessToken, ApiResponse, SearchQuery};
use fare_watch::feed::FlightApi;
use fare_watch::route::{DateSource, Pax, RouteSpec};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn offers_body(prices: &[(f64, &str, usize)]) -> String {
    let data: Vec<serde_json::Value> = prices
        .iter()
        .map(|(price, carrier, segments)| {
            let segs: Vec<serde_json::Value> = (0..*segments)
                .map(|_| serde_json::json!({"carrierCode": carrier}))
                .collect();
            serde_json::json!({
                "validatingAirlineCodes": [carrier],
                "price": {"currency": "BRL", "base": format!("{:.2}", price * 0.8), "grandTotal": format!("{:.2}", price)},
                "itineraries": [{"segments": segs}]
            })
        })
        .collect();
    serde_json::json!({"meta": {"count": data.len()}, "data": data}).to_string()
}

pub fn ok(prices: &[(f64, &str, usize)]) -> ApiResponse {
    ApiResponse {
        status: 200,
        retry_after: None,
        body: offers_body(prices),
    }
}

pub fn status(code: u16) -> ApiResponse {
    ApiResponse {
        status: code,
        retry_after: None,
        body: format!(r#"{{"errors":[{{"status":{},"title":"scripted"}}]}}"#, code),
    }
}

/// In-memory API answering search calls from a script, in order.
#[derive(Clone, Default)]
pub struct FakeApi {
    pub script: Arc<Mutex<VecDeque<ApiResponse>>>,
    pub queries: Arc<Mutex<Vec<SearchQuery>>>,
    pub reject_token: bool,
}

impl FakeApi {
    pub fn new(responses: Vec<ApiResponse>) -> Self {
        Self {
            script: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlightApi for FakeApi {
    async fn request_token(&self) -> Result<AccessToken> {
        if self.reject_token {
            anyhow::bail!("token request rejected (401 Unauthorized): invalid_client");
        }
        Ok(AccessToken {
            token: "fake-token".to_string(),
            expires_in: Duration::from_secs(1799),
        })
    }

    async fn search_offers(&self, _token: &str, query: &SearchQuery) -> Result<ApiResponse> {
        self.queries.lock().unwrap().push(query.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => anyhow::bail!("connection refused"),
        }
    }
}

pub fn settings() -> ClientSettings {
    ClientSettings {
        max_results: 20,
        max_attempts: 3,
        backoff_base: Duration::from_millis(500),
        backoff_max: Duration::from_secs(4),
        backoff_jitter: 0.0,
        throttle: Duration::from_millis(100),
        rate_limit_abort_threshold: 5,
        token_safety_margin: Duration::from_secs(60),
    }
}

pub fn fixed_route(id: &str, destination: &str, departure: NaiveDate, watch: Option<WatchConfig>) -> RouteSpec {
    RouteSpec {
        id: id.to_string(),
        name: None,
        origin: "GRU".to_string(),
        destinations: vec![destination.to_string()],
        pax: Pax::default(),
        cabin: "ECONOMY".to_string(),
        currency: "BRL".to_string(),
        direct_only: false,
        dates: DateSource::Fixed {
            departure,
            return_date: departure + chrono::Days::new(15),
        },
        watch,
    }
}
