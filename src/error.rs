//! Run-level errors of the validation engine
//!
//! Per-probe failures never show up here; they are recorded on the probe outcome.

use crate::proxy::report::ValidationReport;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no candidates to validate")]
    NoCandidates,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("run incomplete: {completed} of {total} candidates produced an outcome")]
    Incomplete {
        completed: usize,
        total: usize,
        /// What could be recovered from the outcomes that did arrive
        partial: Box<ValidationReport>,
    },
}

impl ValidationError {
    /// Partial report, if the run got far enough to produce one
    pub fn partial_report(&self) -> Option<&ValidationReport> {
        match self {
            ValidationError::Incomplete { partial, .. } => Some(&**partial),
            _ => None,
        }
    }
}
