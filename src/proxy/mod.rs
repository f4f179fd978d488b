//! Proxy module for collecting and validating proxies
//!
//! This module provides functionality for:
//! - Parsing candidate lists and crawling the sources that publish them
//! - Probing a single candidate through a test URL
//! - Dispatching probes over a candidate set with bounded concurrency
//! - Folding outcomes into run statistics and a final report

pub mod crawler;
pub mod dispatcher;
pub mod models;
pub mod parser;
pub mod probe;
pub mod report;
pub mod stats;

pub use crawler::{CrawlResult, CrawlerConfig, ProxyCrawler, ProxySource};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use models::{Candidate, FailureKind, ProbeOutcome, ProbeStatus, Protocol};
pub use parser::ProxyParser;
pub use probe::{Probe, ProbeConfig, ProxyProbe};
pub use report::{finalize, status_message, ValidationReport};
pub use stats::{ProgressSnapshot, ValidationRun};
