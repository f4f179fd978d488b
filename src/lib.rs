//! Proxy Harvest - public proxy list collector and validator
//!
//! Candidates are fetched from public proxy lists, then every one of them is probed
//! concurrently against a test URL that answers with a fixed status. The result is the list
//! of working proxies plus a stats record for the run.

pub mod config;
pub mod error;
pub mod export;
pub mod proxy;
pub mod store;
pub mod tui;

pub use config::AppConfig;
pub use error::ValidationError;
pub use export::{ClashConfig, ClashSettings};
pub use proxy::*;
pub use store::DataStore;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
