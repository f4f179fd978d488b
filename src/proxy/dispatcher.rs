//! Bounded-concurrency dispatch of probes over a candidate set
//!
//! The dispatcher keeps at most `concurrency` probe tasks in flight on the tokio runtime. Each
//! finished task hands its outcome back to the single collector loop in [`Dispatcher::run_until`],
//! which is the only place the [`ValidationRun`] is mutated. A new probe is started as soon as
//! one finishes, until every candidate has produced exactly one outcome.

use crate::error::ValidationError;
use crate::proxy::models::{Candidate, ProbeOutcome, Protocol};
use crate::proxy::probe::{Probe, ProbeConfig, ProxyProbe};
use crate::proxy::report::{finalize, ValidationReport};
use crate::proxy::stats::{ProgressSnapshot, ValidationRun};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of probes in flight
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Default number of completions between progress log lines
pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of probes in flight at once
    pub concurrency: usize,
    /// Log progress every this many completions (0 logs only the final line)
    pub progress_interval: usize,
    /// Cancel the whole run after this long
    pub run_deadline: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            run_deadline: None,
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }
}

/// Runs a probe over every candidate with bounded concurrency
pub struct Dispatcher<P> {
    probe: Arc<P>,
    config: DispatchConfig,
    progress: Option<watch::Sender<ProgressSnapshot>>,
    outcome_tap: Option<mpsc::UnboundedSender<ProbeOutcome>>,
}

impl Dispatcher<ProxyProbe> {
    /// Dispatcher backed by the network probe
    pub fn with_proxy_probe(probe_config: ProbeConfig, config: DispatchConfig) -> Self {
        Self::new(ProxyProbe::with_config(probe_config), config)
    }
}

impl<P: Probe> Dispatcher<P> {
    pub fn new(probe: P, config: DispatchConfig) -> Self {
        Self {
            probe: Arc::new(probe),
            config,
            progress: None,
            outcome_tap: None,
        }
    }

    /// Publish a progress snapshot after every completion
    pub fn with_progress(mut self, progress: watch::Sender<ProgressSnapshot>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Send a copy of every outcome as it is folded
    pub fn with_outcome_tap(mut self, tap: mpsc::UnboundedSender<ProbeOutcome>) -> Self {
        self.outcome_tap = Some(tap);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Validate every candidate and return the final report
    pub async fn run(
        &self,
        protocol: Protocol,
        candidates: Vec<Candidate>,
    ) -> Result<ValidationReport, ValidationError> {
        self.run_until(protocol, candidates, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), stopping early when `cancel` fires.
    ///
    /// On cancellation, probes in flight resolve as timeouts and candidates not yet started are
    /// recorded as skipped, so the run still accounts for every candidate.
    pub async fn run_until(
        &self,
        protocol: Protocol,
        candidates: Vec<Candidate>,
        cancel: CancellationToken,
    ) -> Result<ValidationReport, ValidationError> {
        if candidates.is_empty() {
            return Err(ValidationError::NoCandidates);
        }
        if self.config.concurrency == 0 {
            return Err(ValidationError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let total = candidates.len();
        let limit = self.config.concurrency.min(total);
        let cancel = cancel.child_token();
        let deadline = self.config.run_deadline.map(|after| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                warn!(deadline = ?after, "run deadline reached, cancelling remaining probes");
                token.cancel();
            })
        });

        info!(%protocol, total, concurrency = limit, "starting validation");

        let run = ValidationRun::start(total);
        let result = self
            .collect(
                protocol,
                run,
                candidates.into_iter(),
                JoinSet::new(),
                limit,
                &cancel,
            )
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }
        result
    }

    /// Collector loop: keeps `in_flight` topped up to `limit` from `pending` and folds every
    /// joined outcome into `run`, then checks that every candidate was accounted for.
    async fn collect(
        &self,
        protocol: Protocol,
        mut run: ValidationRun,
        mut pending: impl Iterator<Item = Candidate>,
        mut in_flight: JoinSet<ProbeOutcome>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, ValidationError> {
        self.publish(&run);

        loop {
            if cancel.is_cancelled() {
                for candidate in pending.by_ref() {
                    self.record(&mut run, ProbeOutcome::skipped(&candidate));
                }
            }

            while in_flight.len() < limit {
                let Some(candidate) = pending.next() else {
                    break;
                };
                self.spawn_probe(&mut in_flight, candidate, cancel.clone());
            }

            match in_flight.join_next().await {
                Some(Ok(outcome)) => self.record(&mut run, outcome),
                Some(Err(e)) => error!(error = %e, "probe task ended without an outcome"),
                None => break,
            }
        }

        run.finish();
        let total = run.total_candidates();
        let report = finalize(protocol, &run);
        if !run.is_complete() {
            warn!(
                %protocol,
                completed = run.completed_count(),
                total,
                "validation run is incomplete"
            );
            return Err(ValidationError::Incomplete {
                completed: run.completed_count(),
                total,
                partial: Box::new(report),
            });
        }

        info!(
            %protocol,
            valid = report.valid_count,
            total = report.total_count,
            rate = %format!("{:.1}%", report.success_rate_percent),
            seconds = %format!("{:.2}", report.validation_duration_seconds),
            "validation finished"
        );
        Ok(report)
    }

    fn spawn_probe(
        &self,
        in_flight: &mut JoinSet<ProbeOutcome>,
        candidate: Candidate,
        cancel: CancellationToken,
    ) {
        let probe = Arc::clone(&self.probe);
        in_flight.spawn(async move {
            if cancel.is_cancelled() {
                return ProbeOutcome::skipped(&candidate);
            }
            let start = Instant::now();
            if !candidate.has_separator() {
                return ProbeOutcome::other(&candidate, "missing ':' separator")
                    .with_response_time(elapsed_ms(start));
            }

            let attempt = AssertUnwindSafe(probe.probe(&candidate)).catch_unwind();
            tokio::select! {
                result = attempt => match result {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let detail = format!("probe panicked: {}", panic_message(panic.as_ref()));
                        ProbeOutcome::other(&candidate, detail)
                            .with_response_time(elapsed_ms(start))
                    }
                },
                _ = cancel.cancelled() => {
                    ProbeOutcome::timeout(&candidate)
                        .with_detail("run cancelled")
                        .with_response_time(elapsed_ms(start))
                }
            }
        });
    }

    fn record(&self, run: &mut ValidationRun, outcome: ProbeOutcome) {
        debug!(
            endpoint = %outcome.endpoint,
            status = ?outcome.status,
            kind = ?outcome.failure_kind,
            ms = ?outcome.response_time_ms,
            "probe outcome"
        );
        if let Some(tap) = &self.outcome_tap {
            // A closed tap only means nobody is watching any more.
            let _ = tap.send(outcome.clone());
        }

        run.fold(outcome);
        let progress = self.publish(run);

        let interval = self.config.progress_interval;
        if interval > 0 && progress.completed % interval == 0 && !progress.is_done() {
            info!(
                completed = progress.completed,
                total = progress.total,
                valid = progress.succeeded,
                "validation progress {}%",
                progress.percent()
            );
        }
    }

    fn publish(&self, run: &ValidationRun) -> ProgressSnapshot {
        let progress = run.progress();
        if let Some(tx) = &self.progress {
            tx.send_replace(progress);
        }
        progress
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
