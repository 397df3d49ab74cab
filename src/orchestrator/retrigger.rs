//! Event loop of one attempt.
//!
//! The orchestrator subscribes to both topics, then waits on whichever of
//! the retrigger timer and the next session event is ready first. The timer
//! is a single pinned sleep that is re-armed by resetting its deadline, so
//! at most one retrigger is ever pending.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::attempt::{score_from_frame, Action, AttemptState};
use super::{RESULT_TOPIC, SUBMISSION_TOPIC};
use crate::git::CommitProducer;
use crate::sockjs::{Command, Frame, Session, SessionEvent};
use crate::AppError;

/// Retrigger delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriggerTiming {
    /// Delay of the first retrigger and of immediate retriggers.
    pub immediate: Duration,
    /// Back-off after a result below target.
    pub after_result: Duration,
}

impl Default for RetriggerTiming {
    fn default() -> Self {
        Self {
            immediate: Duration::from_millis(1),
            after_result: Duration::from_secs(1),
        }
    }
}

/// Terminal state of an attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Target reached.
    Succeeded {
        /// Score that met the target.
        percentage: u32,
    },
    /// The attempt failed; a fresh one may succeed.
    Recoverable(AppError),
    /// The attempt failed in a way retrying cannot fix.
    Fatal(AppError),
}

impl AttemptOutcome {
    /// Classify `err` by [`AppError::is_fatal`].
    #[must_use]
    pub fn from_error(err: AppError) -> Self {
        if err.is_fatal() {
            Self::Fatal(err)
        } else {
            Self::Recoverable(err)
        }
    }
}

/// Outcome of an attempt together with its final state.
#[derive(Debug)]
pub struct AttemptReport {
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// State at the moment it ended.
    pub state: AttemptState,
    /// Hashes of the commits pushed during the attempt, oldest first.
    pub commits: Vec<String>,
}

/// Drives one attempt over an open session.
pub struct RetriggerOrchestrator<'a> {
    session: &'a mut Session,
    commits: &'a dyn CommitProducer,
    state: AttemptState,
    timing: RetriggerTiming,
    trail: Vec<String>,
}

impl<'a> RetriggerOrchestrator<'a> {
    /// Prepare an attempt. Nothing is sent until [`Self::run`].
    #[must_use]
    pub fn new(
        session: &'a mut Session,
        commits: &'a dyn CommitProducer,
        state: AttemptState,
        timing: RetriggerTiming,
    ) -> Self {
        Self {
            session,
            commits,
            state,
            timing,
            trail: Vec::new(),
        }
    }

    /// Run until the attempt reaches a terminal state.
    ///
    /// On success the session has been closed; on failure closing it is
    /// left to the caller.
    pub async fn run(mut self) -> AttemptReport {
        let outcome = self.drive().await;
        AttemptReport {
            outcome,
            state: self.state,
            commits: self.trail,
        }
    }

    async fn drive(&mut self) -> AttemptOutcome {
        for topic in [SUBMISSION_TOPIC, RESULT_TOPIC] {
            if let Err(err) = self.session.subscribe(topic).await {
                warn!(%err, topic, "subscription failed");
                return AttemptOutcome::from_error(err);
            }
        }

        info!(
            desired = self.state.desired_percentage,
            current = self.state.current_percentage,
            "retrigger loop started"
        );

        let timer = tokio::time::sleep(self.timing.immediate);
        tokio::pin!(timer);
        let mut armed = true;

        loop {
            tokio::select! {
                () = &mut timer, if armed => {
                    armed = false;
                    if let Err(err) = self.retrigger().await {
                        warn!(%err, "retrigger failed");
                        return AttemptOutcome::from_error(err);
                    }
                }
                event = self.session.next_event() => match event {
                    SessionEvent::Frame(frame) => {
                        let delay = match self.handle_frame(&frame) {
                            Action::Wait => None,
                            Action::RetriggerNow => Some(self.timing.immediate),
                            Action::RetriggerLater => Some(self.timing.after_result),
                            Action::Exit => {
                                self.session.close().await;
                                return AttemptOutcome::Succeeded {
                                    percentage: self.state.current_percentage,
                                };
                            }
                        };
                        if let Some(delay) = delay {
                            timer.as_mut().reset(Instant::now() + delay);
                            armed = true;
                        }
                    }
                    SessionEvent::Error(err) => warn!(%err, "session error"),
                    SessionEvent::Closed => {
                        if self.state.is_exiting {
                            return AttemptOutcome::Succeeded {
                                percentage: self.state.current_percentage,
                            };
                        }
                        warn!("session closed unexpectedly");
                        return AttemptOutcome::Recoverable(AppError::Connection(
                            "session closed unexpectedly".into(),
                        ));
                    }
                },
            }
        }
    }

    async fn retrigger(&mut self) -> crate::Result<()> {
        info!("retriggering build");
        let hash = self.commits.push_empty_commit().await?;
        info!(hash = %hash, "build retriggered");
        self.trail.push(hash);
        Ok(())
    }

    fn handle_frame(&mut self, frame: &Frame) -> Action {
        match frame.command {
            Command::Message => {}
            Command::Error => {
                warn!(message = frame.header("message").unwrap_or_default(), "server reported an error");
                return Action::Wait;
            }
            _ => return Action::Wait,
        }

        match frame.destination() {
            Some(SUBMISSION_TOPIC) => self.state.on_submission(),
            Some(RESULT_TOPIC) => match score_from_frame(frame) {
                Ok(score) => self.state.on_result(score),
                Err(err) => {
                    warn!(%err, "unreadable result");
                    self.state.on_unreadable_result()
                }
            },
            other => {
                debug!(destination = other.unwrap_or_default(), "ignoring message");
                Action::Wait
            }
        }
    }
}
