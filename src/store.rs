//! Flat-file persistence for candidate lists, valid lists and stats records
//!
//! Layout inside the data directory, per protocol:
//! - `raw_ips_<protocol>.txt`: fetched candidates, one endpoint per line
//! - `valid_ips_<protocol>.txt`: endpoints that passed validation, sorted
//! - `stats_<protocol>.json`: the last [`ValidationReport`]
//!
//! plus the exported Clash config (`clash_config.yaml` by default).

use crate::export::ClashConfig;
use crate::proxy::models::{Candidate, Protocol};
use crate::proxy::parser::ProxyParser;
use crate::proxy::report::ValidationReport;
use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Data directory used when none is configured
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct DataStore {
    dir: PathBuf,
}

impl DataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn raw_path(&self, protocol: Protocol) -> PathBuf {
        self.dir.join(format!("raw_ips_{}.txt", protocol))
    }

    pub fn valid_path(&self, protocol: Protocol) -> PathBuf {
        self.dir.join(format!("valid_ips_{}.txt", protocol))
    }

    pub fn stats_path(&self, protocol: Protocol) -> PathBuf {
        self.dir.join(format!("stats_{}.json", protocol))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating data directory {}", self.dir.display()))
    }

    /// Write the fetched candidate list for a protocol
    pub fn save_candidates(&self, protocol: Protocol, candidates: &[Candidate]) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.raw_path(protocol);
        let endpoints: Vec<&str> = candidates.iter().map(|c| c.endpoint.as_str()).collect();
        ProxyParser::save_to_file(&endpoints, &path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(%protocol, count = candidates.len(), path = %path.display(), "saved candidates");
        Ok(path)
    }

    /// Load the candidate list for a protocol
    pub fn load_candidates(&self, protocol: Protocol) -> Result<Vec<Candidate>> {
        let path = self.raw_path(protocol);
        if !path.exists() {
            anyhow::bail!("{} not found, run `fetch` first", path.display());
        }
        let candidates = ProxyParser::parse_file(&path, protocol)
            .with_context(|| format!("reading {}", path.display()))?;
        info!(%protocol, count = candidates.len(), path = %path.display(), "loaded candidates");
        Ok(candidates)
    }

    /// Write the valid endpoints of a report, sorted for stable diffs
    pub fn save_valid(&self, report: &ValidationReport) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.valid_path(report.protocol);
        ProxyParser::save_to_file(&report.sorted_endpoints(), &path)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Write the stats record of a report as pretty JSON
    pub fn save_report(&self, report: &ValidationReport) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.stats_path(report.protocol);
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Read the stats record for a protocol, if one was written
    pub fn load_report(&self, protocol: Protocol) -> Result<Option<ValidationReport>> {
        let path = self.stats_path(protocol);
        if !path.exists() {
            return Ok(None);
        }
        let json =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let report = serde_json::from_str(&json)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(report))
    }

    /// Where an exported config lands; absolute paths are kept as they are
    pub fn clash_path(&self, file: &Path) -> PathBuf {
        self.dir.join(file)
    }

    /// Write a Clash config as YAML
    pub fn save_clash(&self, clash: &ClashConfig, file: &Path) -> Result<PathBuf> {
        let path = self.clash_path(file);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        fs::write(&path, clash.to_yaml()?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(proxies = clash.proxies.len(), path = %path.display(), "saved clash config");
        Ok(path)
    }

    /// Every stats record present, in protocol order
    pub fn load_reports(&self) -> Result<Vec<ValidationReport>> {
        let mut reports = Vec::new();
        for protocol in Protocol::ALL {
            if let Some(report) = self.load_report(protocol)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}
