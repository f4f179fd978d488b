//! Final report of a validation run and the status messages built from it

use crate::proxy::models::{FailureKind, Protocol};
use crate::proxy::stats::ValidationRun;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of every commit/status message
const MESSAGE_PREFIX: &str = "[Bot] Proxy IP Updated";

/// Immutable summary of one finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub protocol: Protocol,
    pub valid_count: usize,
    pub total_count: usize,
    pub success_rate_percent: f64,
    pub validation_duration_seconds: f64,
    pub run_timestamp: DateTime<Utc>,
    /// Endpoints that passed, in completion order
    pub valid_endpoints: Vec<String>,
    #[serde(default)]
    pub failure_breakdown: BTreeMap<FailureKind, usize>,
}

/// Freeze a run into its report
pub fn finalize(protocol: Protocol, run: &ValidationRun) -> ValidationReport {
    let valid_endpoints: Vec<String> = run.valid_endpoints().map(String::from).collect();

    let mut failure_breakdown = BTreeMap::new();
    for kind in run.outcomes().iter().filter_map(|o| o.failure_kind) {
        *failure_breakdown.entry(kind).or_insert(0) += 1;
    }

    ValidationReport {
        protocol,
        valid_count: valid_endpoints.len(),
        total_count: run.total_candidates(),
        success_rate_percent: success_rate(valid_endpoints.len(), run.total_candidates()),
        validation_duration_seconds: run.elapsed().as_secs_f64(),
        run_timestamp: run.started_at(),
        valid_endpoints,
        failure_breakdown,
    }
}

/// `100 * valid / total`, or `0` when there is nothing to divide by
pub fn success_rate(valid: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        valid as f64 * 100.0 / total as f64
    }
}

impl ValidationReport {
    /// Valid endpoints in lexical order
    pub fn sorted_endpoints(&self) -> Vec<String> {
        let mut endpoints = self.valid_endpoints.clone();
        endpoints.sort();
        endpoints
    }

    /// One-line human summary
    pub fn summary_line(&self) -> String {
        if self.total_count == 0 {
            return format!("{}: no data", self.protocol);
        }
        format!(
            "{}: {}/{} valid ({:.1}%) in {:.2}s",
            self.protocol,
            self.valid_count,
            self.total_count,
            self.success_rate_percent,
            self.validation_duration_seconds
        )
    }
}

/// Commit/status message for a set of per-protocol reports.
///
/// Never ends with a newline.
pub fn status_message(reports: &[ValidationReport]) -> String {
    let with_data: Vec<String> = reports
        .iter()
        .filter(|r| r.total_count > 0)
        .map(ValidationReport::summary_line)
        .collect();

    if with_data.is_empty() {
        return format!("{} (no data)", MESSAGE_PREFIX);
    }
    format!("{} | {}", MESSAGE_PREFIX, with_data.join(" | "))
}
