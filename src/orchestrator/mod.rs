//! Retrigger orchestration.
//!
//! Covers the per-attempt state machine, the event loop that turns session
//! events into retriggers, and the supervisor that restarts failed attempts.

pub mod attempt;
pub mod retrigger;
pub mod supervisor;

pub use attempt::{Action, AttemptState};
pub use retrigger::{AttemptOutcome, AttemptReport, RetriggerOrchestrator, RetriggerTiming};
pub use supervisor::{
    AttemptBackend, AttemptResources, Supervisor, SupervisorOutcome, SupervisorReport,
    SupervisorSettings,
};

/// Topic announcing that a build started.
pub const SUBMISSION_TOPIC: &str = "/user/topic/newSubmissions";

/// Topic delivering build results.
pub const RESULT_TOPIC: &str = "/user/topic/newResults";
