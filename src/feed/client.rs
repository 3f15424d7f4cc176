//! Query protocol around a [`FlightApi`]: token cache, retry with backoff,
//! fixed throttle and the run-wide consecutive-429 circuit breaker.

use super::types::{summarize_error_body, ApiResponse, OffersPayload, SearchQuery};
use super::FlightApi;
use crate::config::Config;
use crate::route::RouteInstance;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub max_results: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter: f64,
    pub throttle: Duration,
    pub rate_limit_abort_threshold: u32,
    pub token_safety_margin: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_results: config.query.max_results,
            max_attempts: config.query.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.query.backoff_base_ms),
            backoff_max: Duration::from_millis(config.query.backoff_max_ms),
            backoff_jitter: config.query.backoff_jitter,
            throttle: config.query.throttle(),
            rate_limit_abort_threshold: config.query.rate_limit_abort_threshold.max(1),
            token_safety_margin: Duration::from_secs(config.api.token_safety_margin_s),
        }
    }

    /// Exponential delay for the given 1-based attempt, capped, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Counters for everything the client sent during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    pub http_requests: u64,
    pub retries: u64,
    pub reauths: u64,
    pub rate_limited: u64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("HTTP {status} for {context}: {message}")]
    Http {
        status: u16,
        message: String,
        context: String,
    },
    #[error("rate limited after {attempts} attempt(s) for {context}")]
    RateLimited { attempts: u32, context: String },
    #[error("transport error for {context}: {message}")]
    Transport { message: String, context: String },
    #[error("undecodable response for {context}: {message}")]
    Decode { message: String, context: String },
}

impl QueryError {
    /// Errors after which no further call in this run can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueryError::Auth(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, QueryError::RateLimited { .. })
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct FlightQueryClient<A> {
    api: A,
    settings: ClientSettings,
    token: Option<CachedToken>,
    consecutive_429: u32,
    tripped: bool,
    stats: CallStats,
    rng: StdRng,
}

impl<A: FlightApi> FlightQueryClient<A> {
    pub fn new(api: A, settings: ClientSettings) -> Self {
        Self {
            api,
            settings,
            token: None,
            consecutive_429: 0,
            tripped: false,
            stats: CallStats::default(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn stats(&self) -> CallStats {
        self.stats
    }

    /// True once the consecutive-429 counter reached the abort threshold.
    /// Stays set for the rest of the run.
    pub fn breaker_tripped(&self) -> bool {
        self.tripped
    }

    /// Query offers for one instance.
    ///
    /// An empty list is a normal result. 429 and 5xx are retried with backoff
    /// up to `max_attempts`; 401/403 drops the cached token and retries once;
    /// any other status fails immediately. The throttle delay follows every
    /// call whatever its outcome.
    pub async fn search(&mut self, instance: &RouteInstance) -> Result<Vec<Value>, QueryError> {
        let query = SearchQuery::from_instance(instance, self.settings.max_results);
        let context = instance.describe();
        if self.tripped {
            return Err(QueryError::RateLimited {
                attempts: 0,
                context,
            });
        }

        let max_attempts = self.settings.max_attempts;
        let mut reauthed = false;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let token = self.token().await?;
            self.stats.http_requests += 1;
            let result = self.api.search_offers(&token, &query).await;
            tokio::time::sleep(self.settings.throttle).await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let message = format!("{:#}", e);
                    if attempt >= max_attempts {
                        return Err(QueryError::Transport { message, context });
                    }
                    tracing::warn!(request = %context, attempt, error = %message, "search request failed, retrying");
                    self.backoff(attempt, None).await;
                    continue;
                }
            };

            if response.status != 429 {
                self.consecutive_429 = 0;
            }

            match response.status {
                200..=299 => return decode_offers(&response, &context),
                401 | 403 => {
                    self.token = None;
                    if reauthed {
                        return Err(QueryError::Auth(format!(
                            "HTTP {} with a fresh token: {}",
                            response.status,
                            summarize_error_body(&response.body)
                        )));
                    }
                    if attempt >= max_attempts {
                        return Err(http_error(&response, context));
                    }
                    tracing::info!(request = %context, status = response.status, "token rejected, re-authenticating");
                    reauthed = true;
                    self.stats.reauths += 1;
                }
                429 => {
                    self.consecutive_429 += 1;
                    self.stats.rate_limited += 1;
                    if self.consecutive_429 >= self.settings.rate_limit_abort_threshold {
                        self.tripped = true;
                        tracing::warn!(
                            request = %context,
                            consecutive = self.consecutive_429,
                            "rate-limit circuit breaker tripped"
                        );
                        return Err(QueryError::RateLimited {
                            attempts: attempt,
                            context,
                        });
                    }
                    if attempt >= max_attempts {
                        return Err(QueryError::RateLimited {
                            attempts: attempt,
                            context,
                        });
                    }
                    tracing::debug!(request = %context, attempt, "rate limited, backing off");
                    self.backoff(attempt, response.retry_after).await;
                }
                500..=599 => {
                    if attempt >= max_attempts {
                        return Err(http_error(&response, context));
                    }
                    tracing::warn!(request = %context, status = response.status, attempt, "server error, retrying");
                    self.backoff(attempt, response.retry_after).await;
                }
                _ => return Err(http_error(&response, context)),
            }
        }
    }

    async fn token(&mut self) -> Result<String, QueryError> {
        if let Some(cached) = &self.token {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }
        let fresh = self
            .api
            .request_token()
            .await
            .map_err(|e| QueryError::Auth(format!("{:#}", e)))?;
        let lifetime = fresh
            .expires_in
            .saturating_sub(self.settings.token_safety_margin);
        tracing::debug!(lifetime_s = lifetime.as_secs(), "acquired access token");
        self.token = Some(CachedToken {
            token: fresh.token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(fresh.token)
    }

    async fn backoff(&mut self, attempt: u32, hint: Option<Duration>) {
        let delay = match hint {
            Some(hint) => hint.min(self.settings.backoff_max),
            None => {
                let base = self.settings.backoff_delay(attempt);
                if self.settings.backoff_jitter > 0.0 {
                    let extra = self.rng.gen_range(0.0..=self.settings.backoff_jitter);
                    base.mul_f64(1.0 + extra)
                } else {
                    base
                }
            }
        };
        self.stats.retries += 1;
        tokio::time::sleep(delay).await;
    }
}

fn http_error(response: &ApiResponse, context: String) -> QueryError {
    QueryError::Http {
        status: response.status,
        message: summarize_error_body(&response.body),
        context,
    }
}

fn decode_offers(response: &ApiResponse, context: &str) -> Result<Vec<Value>, QueryError> {
    if response.body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<OffersPayload>(&response.body)
        .map(OffersPayload::into_values)
        .map_err(|e| QueryError::Decode {
            message: e.to_string(),
            context: context.to_string(),
        })
}
