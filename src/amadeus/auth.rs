use super::types::{TokenResponse, TOKEN_PATH};
use crate::config::Credentials;
use crate::feed::types::{summarize_error_body, AccessToken};
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Client-credentials grant against the OAuth2 token endpoint.
pub struct AmadeusAuth {
    credentials: Credentials,
}

impl AmadeusAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    fn form(&self) -> [(&'static str, &str); 3] {
        [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ]
    }

    /// Exchange the credentials for a bearer token.
    pub async fn fetch_token(&self, client: &Client, base_url: &str) -> Result<AccessToken> {
        let url = format!("{}{}", base_url, TOKEN_PATH);
        let resp = client
            .post(&url)
            .form(&self.form())
            .send()
            .await
            .context("token request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "token request rejected ({}): {}. Check AMADEUS_CLIENT_ID / AMADEUS_CLIENT_SECRET",
                status,
                summarize_error_body(&body)
            );
        }
        let parsed: TokenResponse = resp.json().await.context("failed to parse token response")?;
        if parsed.access_token.trim().is_empty() {
            anyhow::bail!("token response carried an empty access_token");
        }
        Ok(AccessToken {
            token: parsed.access_token,
            expires_in: Duration::from_secs(parsed.expires_in),
        })
    }
}
