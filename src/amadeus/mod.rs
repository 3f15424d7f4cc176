//! Amadeus Self-Service flight offers API.

pub mod auth;
pub mod rest;
pub mod types;

pub use auth::AmadeusAuth;
pub use rest::AmadeusRest;
