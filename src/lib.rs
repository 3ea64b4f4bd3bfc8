//! Link discovery for justjoin.it job search results
//!
//! Drives a browser down each (job name, location) result list, harvests the
//! posting links it renders and appends the unseen ones to `data/links.jsonl`.

pub mod browser;
pub mod collector;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod harvester;
pub mod models;
pub mod overlay;
pub mod retry;
pub mod scroll;
pub mod session;
pub mod sites;
pub mod store;
pub mod traits;

#[cfg(test)]
mod testing;

pub use collector::LinkCollector;
pub use config::{Config, DataPaths};
pub use error::{CollectError, DriverError, StoreError};
pub use session::SessionState;
pub use store::DedupeStore;
