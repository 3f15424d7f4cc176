pub mod alerts;
pub mod rules;
pub mod runner;
pub mod tracker;

pub use runner::{RouteRunner, Selection, StopReason};
pub use tracker::{BestPriceTracker, BestRecord};
