//! Outer recovery loop.
//!
//! The supervisor checks the current score once, then runs attempts until
//! one succeeds. Every attempt gets a fresh login, repository clone and
//! websocket session from the [`AttemptBackend`]; a session is never
//! reused after its attempt ends. Recoverable failures are followed by a
//! fixed delay, fatal failures end the run. Cancellation is honoured at
//! every await point and closes the active session.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::attempt::AttemptState;
use super::retrigger::{AttemptOutcome, RetriggerOrchestrator, RetriggerTiming};
use crate::git::CommitProducer;
use crate::sockjs::Session;
use crate::Result;

/// Everything one attempt runs on.
pub struct AttemptResources {
    /// Handshaken session, not yet subscribed.
    pub session: Session,
    /// Producer of retrigger commits.
    pub commits: Box<dyn CommitProducer>,
    /// Score known when the attempt started.
    pub current_percentage: u32,
}

/// Source of attempts and score lookups.
pub trait AttemptBackend: Send + Sync {
    /// Score of the most recent result.
    ///
    /// # Errors
    ///
    /// Lookup failures; fatal ones end the run.
    fn current_percentage(&self) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>>;

    /// Authenticate, resolve the exercise and open a new session.
    ///
    /// # Errors
    ///
    /// Any failure while preparing the attempt; fatal ones end the run.
    fn start_attempt(&self)
        -> Pin<Box<dyn Future<Output = Result<AttemptResources>> + Send + '_>>;
}

/// Supervisor tuning.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// Score at which the run stops.
    pub desired_percentage: u32,
    /// Pause before a new attempt after a recoverable failure.
    pub retry_delay: Duration,
    /// Delays used inside each attempt.
    pub timing: RetriggerTiming,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// An attempt reached the target.
    Reached,
    /// The target was met before anything was pushed.
    AlreadySatisfied,
    /// Cancelled before reaching the target.
    Interrupted,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    /// How the run ended.
    pub outcome: SupervisorOutcome,
    /// Last known score.
    pub final_percentage: u32,
    /// Every pushed commit hash, oldest first.
    pub commits: Vec<String>,
    /// Number of attempts started.
    pub attempts: u32,
}

/// Runs attempts until the target is reached.
pub struct Supervisor<B> {
    backend: B,
    settings: SupervisorSettings,
}

impl<B: AttemptBackend> Supervisor<B> {
    /// Create a supervisor over `backend`.
    #[must_use]
    pub fn new(backend: B, settings: SupervisorSettings) -> Self {
        Self { backend, settings }
    }

    /// Run until success, a fatal error or cancellation.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<SupervisorReport> {
        let desired = self.settings.desired_percentage;
        let mut report = SupervisorReport {
            outcome: SupervisorOutcome::Interrupted,
            final_percentage: 0,
            commits: Vec::new(),
            attempts: 0,
        };

        let initial = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(report),
            initial = self.backend.current_percentage() => initial,
        };
        match initial {
            Ok(score) => {
                report.final_percentage = score;
                if score >= desired {
                    info!(score, desired, "desired percentage already reached");
                    report.outcome = SupervisorOutcome::AlreadySatisfied;
                    return Ok(report);
                }
            }
            Err(err) if err.is_fatal() => {
                error!(%err, "cannot resolve the current score");
                return Err(err);
            }
            Err(err) => warn!(%err, "current score unavailable, starting anyway"),
        }

        loop {
            report.attempts += 1;
            let attempt = report.attempts;
            let span = info_span!("attempt", attempt);

            match self.attempt(&cancel, &mut report).instrument(span).await {
                Step::Done => return Ok(report),
                Step::Fatal(err) => {
                    error!(%err, attempt, "fatal failure");
                    return Err(err);
                }
                Step::Retry => {
                    warn!(
                        attempt,
                        delay_secs = self.settings.retry_delay.as_secs_f64(),
                        "attempt failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            report.outcome = SupervisorOutcome::Interrupted;
                            return Ok(report);
                        }
                        () = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&self, cancel: &CancellationToken, report: &mut SupervisorReport) -> Step {
        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                report.outcome = SupervisorOutcome::Interrupted;
                return Step::Done;
            }
            started = self.backend.start_attempt() => started,
        };
        let mut resources = match started {
            Ok(resources) => resources,
            Err(err) if err.is_fatal() => return Step::Fatal(err),
            Err(err) => {
                warn!(%err, "could not start attempt");
                return Step::Retry;
            }
        };

        report.final_percentage = resources.current_percentage;
        let state = AttemptState::new(
            self.settings.desired_percentage,
            resources.current_percentage,
        );
        if state.is_satisfied() {
            info!(score = resources.current_percentage, "desired percentage already reached");
            resources.session.close().await;
            report.outcome = SupervisorOutcome::AlreadySatisfied;
            return Step::Done;
        }

        let finished = {
            let orchestrator = RetriggerOrchestrator::new(
                &mut resources.session,
                resources.commits.as_ref(),
                state,
                self.settings.timing,
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                finished = orchestrator.run() => Some(finished),
            }
        };
        resources.session.close().await;

        let Some(finished) = finished else {
            info!("cancelled, session closed");
            report.outcome = SupervisorOutcome::Interrupted;
            return Step::Done;
        };

        report.commits.extend(finished.commits);
        report.final_percentage = finished.state.current_percentage;
        match finished.outcome {
            AttemptOutcome::Succeeded { percentage } => {
                info!(percentage, "attempt succeeded");
                report.final_percentage = percentage;
                report.outcome = SupervisorOutcome::Reached;
                Step::Done
            }
            AttemptOutcome::Recoverable(err) => {
                warn!(%err, "attempt ended");
                Step::Retry
            }
            AttemptOutcome::Fatal(err) => Step::Fatal(err),
        }
    }
}

enum Step {
    Done,
    Retry,
    Fatal(crate::AppError),
}
