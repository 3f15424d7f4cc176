use super::auth::AmadeusAuth;
use super::types::{parse_retry_after, search_params, SEARCH_PATH};
use crate::config::{ApiConfig, Credentials};
use crate::feed::types::{AccessToken, ApiResponse, SearchQuery};
use crate::feed::FlightApi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use std::time::Duration;

pub struct AmadeusRest {
    client: Client,
    auth: AmadeusAuth,
    base_url: String,
}

impl AmadeusRest {
    pub fn new(config: &ApiConfig, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            auth: AmadeusAuth::new(credentials),
            base_url: config.resolved_base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl FlightApi for AmadeusRest {
    async fn request_token(&self) -> Result<AccessToken> {
        tracing::debug!(client_id = self.auth.client_id(), "requesting access token");
        self.auth.fetch_token(&self.client, &self.base_url).await
    }

    async fn search_offers(&self, token: &str, query: &SearchQuery) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&search_params(query))
            .send()
            .await
            .context("GET flight-offers failed")?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = resp
            .text()
            .await
            .context("failed to read flight-offers response")?;
        Ok(ApiResponse {
            status,
            retry_after,
            body,
        })
    }
}
