//! Per-attempt bookkeeping and its transition rules.
//!
//! [`AttemptState`] is owned by exactly one orchestrator and is created
//! fresh for every attempt, so nothing leaks between supervisor retries.
//! The transitions are pure: they update the state and return the
//! [`Action`] the event loop has to carry out.

use tracing::{info, warn};

use crate::artemis::exercise::truncate_score;
use crate::sockjs::Frame;
use crate::{AppError, Result};

/// Body field carrying the score of a result notification.
const SCORE_FIELD: &str = "score";

/// What the event loop must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing; keep waiting for events.
    Wait,
    /// Push a new commit as soon as possible.
    RetriggerNow,
    /// Push a new commit after the result back-off.
    RetriggerLater,
    /// Target reached; close the session and finish.
    Exit,
}

/// Mutable state of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptState {
    /// A submission was announced and its result is still outstanding.
    pub expecting_result: bool,
    /// Score at which the attempt succeeds.
    pub desired_percentage: u32,
    /// Score of the latest result seen.
    pub current_percentage: u32,
    /// Set once when the target is reached; closure is expected from then on.
    pub is_exiting: bool,
}

impl AttemptState {
    /// Fresh state for an attempt starting at `current_percentage`.
    #[must_use]
    pub fn new(desired_percentage: u32, current_percentage: u32) -> Self {
        Self {
            expecting_result: false,
            desired_percentage,
            current_percentage,
            is_exiting: false,
        }
    }

    /// Whether the latest known score meets the target.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.current_percentage >= self.desired_percentage
    }

    /// A build was announced.
    ///
    /// A second announcement without a result in between means the service
    /// lost track of the previous build; retrigger immediately and keep
    /// waiting for a result.
    pub fn on_submission(&mut self) -> Action {
        if self.expecting_result {
            warn!("submission announced while a result is outstanding, retriggering");
            return Action::RetriggerNow;
        }
        info!("build in progress");
        self.expecting_result = true;
        Action::Wait
    }

    /// A result with `score` percent arrived.
    pub fn on_result(&mut self, score: u32) -> Action {
        self.current_percentage = score;
        if score >= self.desired_percentage {
            info!(score, desired = self.desired_percentage, "desired percentage reached");
            self.is_exiting = true;
            return Action::Exit;
        }
        info!(score, desired = self.desired_percentage, "result below target");
        self.expecting_result = false;
        Action::RetriggerLater
    }

    /// A result arrived whose score could not be read.
    pub fn on_unreadable_result(&mut self) -> Action {
        self.expecting_result = false;
        Action::RetriggerLater
    }
}

/// Truncated score of a result notification.
///
/// # Errors
///
/// Returns [`AppError::Parse`] when the body has no numeric `score`.
pub fn score_from_frame(frame: &Frame) -> Result<u32> {
    frame
        .body
        .as_ref()
        .and_then(|body| body.get(SCORE_FIELD))
        .and_then(serde_json::Value::as_f64)
        .map(truncate_score)
        .ok_or_else(|| AppError::Parse("result notification without numeric score".into()))
}
