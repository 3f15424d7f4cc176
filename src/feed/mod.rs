pub mod client;
pub mod offer;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use types::{AccessToken, ApiResponse, SearchQuery};

/// Raw access to a flight-offer search API.
///
/// Implementations only move bytes: HTTP status handling, retries and token
/// caching live in [`client::FlightQueryClient`]. `Err` from `search_offers`
/// means the request never produced an HTTP response.
#[async_trait]
pub trait FlightApi: Send + Sync {
    async fn request_token(&self) -> Result<AccessToken>;
    async fn search_offers(&self, token: &str, query: &SearchQuery) -> Result<ApiResponse>;
}
