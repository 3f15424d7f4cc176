pub mod amadeus;
pub mod config;
pub mod coordinator;
pub mod diagnostic;
pub mod engine;
pub mod feed;
pub mod maintenance;
pub mod report;
pub mod route;
pub mod stats;
pub mod store;

pub use coordinator::{RunCoordinator, RunReport};
pub use route::{RouteInstance, RouteSpec};
