//! Running statistics for one validation run

use crate::proxy::models::ProbeOutcome;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Accumulated state of one validation run.
///
/// Only the dispatcher's collector loop owns a run while probes are in flight, so every
/// [`fold`](ValidationRun::fold) is applied one at a time.
#[derive(Debug, Clone)]
pub struct ValidationRun {
    total_candidates: usize,
    completed_count: usize,
    success_count: usize,
    started: Instant,
    started_at: DateTime<Utc>,
    elapsed: Option<Duration>,
    outcomes: Vec<ProbeOutcome>,
}

impl ValidationRun {
    /// Start a run over `total_candidates` candidates
    pub fn start(total_candidates: usize) -> Self {
        Self {
            total_candidates,
            completed_count: 0,
            success_count: 0,
            started: Instant::now(),
            started_at: Utc::now(),
            elapsed: None,
            outcomes: Vec::with_capacity(total_candidates),
        }
    }

    /// Fold one completed outcome into the run
    pub fn fold(&mut self, outcome: ProbeOutcome) {
        self.completed_count += 1;
        if outcome.is_success() {
            self.success_count += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Consuming variant of [`fold`](Self::fold)
    pub fn folded(mut self, outcome: ProbeOutcome) -> Self {
        self.fold(outcome);
        self
    }

    /// Stop the clock; later calls keep the first measurement
    pub fn finish(&mut self) {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.started.elapsed());
        }
    }

    pub fn total_candidates(&self) -> usize {
        self.total_candidates
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time spent dispatching, frozen once [`finish`](Self::finish) has been called
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn outcomes(&self) -> &[ProbeOutcome] {
        &self.outcomes
    }

    /// Endpoints that passed, in completion order
    pub fn valid_endpoints(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.endpoint.as_str())
    }

    /// Every candidate has produced an outcome
    pub fn is_complete(&self) -> bool {
        self.completed_count == self.total_candidates
    }

    /// Read-only progress projection
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total_candidates,
            completed: self.completed_count,
            succeeded: self.success_count,
            elapsed: self.elapsed(),
        }
    }
}

/// Point-in-time view of a run's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn failed(&self) -> usize {
        self.completed - self.succeeded
    }

    /// Completion percentage, `0` for an empty run
    pub fn percent(&self) -> u16 {
        if self.total == 0 {
            0
        } else {
            (self.completed as f64 / self.total as f64 * 100.0) as u16
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{Candidate, FailureKind, Protocol};
    use std::collections::BTreeSet;

    fn outcomes() -> Vec<ProbeOutcome> {
        let c = |e: &str| Candidate::new(e, Protocol::Http);
        vec![
            ProbeOutcome::success(&c("1.1.1.1:80"), 100, 204),
            ProbeOutcome::timeout(&c("2.2.2.2:80")),
            ProbeOutcome::success(&c("3.3.3.3:80"), 50, 204),
            ProbeOutcome::failure(&c("4.4.4.4:80"), FailureKind::ConnectionError),
            ProbeOutcome::other(&c("badformat"), "missing ':'"),
        ]
    }

    fn summary(run: &ValidationRun) -> (usize, usize, BTreeSet<String>) {
        (
            run.completed_count(),
            run.success_count(),
            run.valid_endpoints().map(String::from).collect(),
        )
    }

    #[test]
    fn test_fold_counts() {
        let mut run = ValidationRun::start(5);
        assert_eq!(run.completed_count(), 0);
        assert!(!run.is_complete());

        for outcome in outcomes() {
            run.fold(outcome);
        }

        assert!(run.is_complete());
        assert_eq!(run.completed_count(), 5);
        assert_eq!(run.success_count(), 2);
        assert_eq!(
            run.success_count(),
            run.outcomes().iter().filter(|o| o.is_success()).count()
        );
        assert_eq!(run.outcomes().len(), 5);
    }

    #[test]
    fn test_fold_is_order_independent() {
        let forward = outcomes()
            .into_iter()
            .fold(ValidationRun::start(5), ValidationRun::folded);
        let backward = outcomes()
            .into_iter()
            .rev()
            .fold(ValidationRun::start(5), ValidationRun::folded);

        let mut rotated_input = outcomes();
        rotated_input.rotate_left(2);
        let rotated = rotated_input
            .into_iter()
            .fold(ValidationRun::start(5), ValidationRun::folded);

        assert_eq!(summary(&forward), summary(&backward));
        assert_eq!(summary(&forward), summary(&rotated));
    }

    #[test]
    fn test_fold_split_and_merge_matches_single_pass() {
        // Folding two halves in sequence is the same as folding all at once.
        let all = outcomes();
        let (first, second) = all.split_at(2);
        let mut split = ValidationRun::start(5);
        for o in second.iter().chain(first.iter()) {
            split.fold(o.clone());
        }
        let single = all
            .into_iter()
            .fold(ValidationRun::start(5), ValidationRun::folded);
        assert_eq!(summary(&split), summary(&single));
    }

    #[test]
    fn test_finish_freezes_elapsed() {
        let mut run = ValidationRun::start(0);
        run.finish();
        let first = run.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        run.finish();
        assert_eq!(run.elapsed(), first);
    }

    #[test]
    fn test_progress_snapshot() {
        let mut run = ValidationRun::start(4);
        let mut iter = outcomes().into_iter();
        run.fold(iter.next().unwrap());
        run.fold(iter.next().unwrap());

        let progress = run.progress();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.succeeded, 1);
        assert_eq!(progress.failed(), 1);
        assert_eq!(progress.percent(), 50);
        assert!(!progress.is_done());

        // Taking a snapshot does not touch the run.
        assert_eq!(run.completed_count(), 2);
    }

    #[test]
    fn test_progress_empty_run() {
        let progress = ValidationRun::start(0).progress();
        assert_eq!(progress.percent(), 0);
        assert!(progress.is_done());
    }
}
