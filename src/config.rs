//! Application configuration
//!
//! Everything has a default; a TOML file only needs the keys it wants to change:
//!
//! ```toml
//! data_dir = "data"
//!
//! [validator]
//! test_url = "http://www.gstatic.com/generate_204"
//! expected_status = 204
//! timeout_secs = 10
//! concurrency = 100
//!
//! [sources]
//! socks5 = ["https://example.com/socks5.txt"]
//!
//! [clash]
//! file = "clash_config.yaml"
//! mixed_port = 7890
//! ```

use crate::export::ClashSettings;
use crate::proxy::crawler::{default_source_urls, CrawlerConfig, ProxySource};
use crate::proxy::dispatcher::{DispatchConfig, DEFAULT_CONCURRENCY, DEFAULT_PROGRESS_INTERVAL};
use crate::proxy::models::Protocol;
use crate::proxy::probe::{
    ProbeConfig, DEFAULT_EXPECTED_STATUS, DEFAULT_TEST_URL, DEFAULT_TIMEOUT_SECS,
};
use crate::store::DEFAULT_DATA_DIR;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory for candidate lists, valid lists and stats
    pub data_dir: PathBuf,
    pub validator: ValidatorSettings,
    pub sources: SourceSettings,
    pub clash: ClashSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            validator: ValidatorSettings::default(),
            sources: SourceSettings::default(),
            clash: ClashSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    pub test_url: String,
    pub expected_status: u16,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub progress_interval: usize,
    pub run_deadline_secs: Option<u64>,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            test_url: DEFAULT_TEST_URL.to_string(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            run_deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub fetch_timeout_secs: u64,
    pub http: Vec<String>,
    pub socks5: Vec<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: CrawlerConfig::default().timeout.as_secs(),
            http: default_source_urls(Protocol::Http),
            socks5: default_source_urls(Protocol::Socks5),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig::new()
            .with_timeout(Duration::from_secs(self.validator.timeout_secs))
            .with_test_url(self.validator.test_url.clone())
            .with_expected_status(self.validator.expected_status)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        let config = DispatchConfig::new()
            .with_concurrency(self.validator.concurrency)
            .with_progress_interval(self.validator.progress_interval);
        match self.validator.run_deadline_secs {
            Some(secs) => config.with_run_deadline(Duration::from_secs(secs)),
            None => config,
        }
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new().with_timeout(Duration::from_secs(self.sources.fetch_timeout_secs))
    }

    /// Configured sources for one protocol
    pub fn sources(&self, protocol: Protocol) -> Vec<ProxySource> {
        let urls = match protocol {
            Protocol::Http => &self.sources.http,
            Protocol::Socks5 => &self.sources.socks5,
        };
        urls.iter()
            .map(|url| ProxySource::from_url(url, protocol))
            .collect()
    }
}
