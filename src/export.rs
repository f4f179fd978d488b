//! Clash configuration export
//!
//! Turns the valid endpoints of the stored stats records into a Clash config: one proxy entry
//! per endpoint, a single `url-test` group over all of them pointed at the validation test URL,
//! and a catch-all rule routing through that group. Endpoints are listed in protocol order, then
//! lexical order; there is no latency ordering.

use crate::proxy::models::{Candidate, Protocol};
use crate::proxy::report::ValidationReport;
use crate::Result;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// File name of the exported config inside the data directory
pub const DEFAULT_CLASH_FILE: &str = "clash_config.yaml";

/// Name of the proxy group every rule routes through
pub const GROUP_NAME: &str = "AutoSelect";

/// Export settings, the `[clash]` table of the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClashSettings {
    /// Output path, relative to the data directory unless absolute
    pub file: PathBuf,
    pub mixed_port: u16,
    pub allow_lan: bool,
    pub external_controller: String,
    /// Seconds between health checks of the group
    pub interval_secs: u64,
    /// Latency difference in ms below which the group keeps its current pick
    pub tolerance_ms: u64,
}

impl Default for ClashSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_CLASH_FILE),
            mixed_port: 7890,
            allow_lan: false,
            external_controller: "127.0.0.1:9090".to_string(),
            interval_secs: 300,
            tolerance_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClashConfig {
    pub mixed_port: u16,
    pub allow_lan: bool,
    pub mode: String,
    pub log_level: String,
    pub external_controller: String,
    pub secret: String,
    pub proxies: Vec<ClashProxy>,
    pub proxy_groups: Vec<ProxyGroup>,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClashProxy {
    pub name: String,
    #[serde(rename = "type")]
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub interval: u64,
    pub tolerance: u64,
    pub proxies: Vec<String>,
}

impl ClashConfig {
    /// Build a config from stats records.
    ///
    /// Fails when no record holds a usable endpoint, since Clash rejects an empty group.
    pub fn from_reports(
        reports: &[ValidationReport],
        settings: &ClashSettings,
        test_url: &str,
    ) -> Result<Self> {
        let mut proxies = Vec::new();
        for report in reports {
            for endpoint in report.sorted_endpoints() {
                let candidate = Candidate::new(endpoint, report.protocol);
                match candidate.host_port() {
                    Ok((host, port)) => proxies.push(ClashProxy {
                        name: format!("{}-{}", report.protocol, candidate.endpoint),
                        protocol: report.protocol,
                        server: host.to_string(),
                        port,
                    }),
                    Err(e) => warn!(endpoint = %candidate.endpoint, error = %e, "not exported"),
                }
            }
        }

        if proxies.is_empty() {
            bail!("no valid proxies to export, run `validate` first");
        }

        let group = ProxyGroup {
            name: GROUP_NAME.to_string(),
            kind: "url-test".to_string(),
            url: test_url.to_string(),
            interval: settings.interval_secs,
            tolerance: settings.tolerance_ms,
            proxies: proxies.iter().map(|p| p.name.clone()).collect(),
        };

        Ok(Self {
            mixed_port: settings.mixed_port,
            allow_lan: settings.allow_lan,
            mode: "rule".to_string(),
            log_level: "info".to_string(),
            external_controller: settings.external_controller.clone(),
            secret: String::new(),
            proxies,
            proxy_groups: vec![group],
            rules: vec![format!("MATCH,{}", GROUP_NAME)],
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
