//! Retrigger commits.
//!
//! The remote build pipeline runs on every push, so a retrigger is an empty
//! commit pushed to the participation repository. [`CommitProducer`] is the
//! seam the orchestrator drives; [`repository::GitRepository`] is the
//! production implementation on top of the `git` CLI.

pub mod repository;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

pub use repository::GitRepository;

/// Where and as whom retrigger commits are made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitConfig {
    /// Clone URL of the participation repository.
    pub url: String,
    /// Branch to clone and push.
    pub branch: String,
    /// Author and committer name.
    pub name: String,
    /// Author and committer email.
    pub email: String,
}

/// HTTP basic credentials for the repository host.
#[derive(Clone, PartialEq, Eq)]
pub struct GitCredentials {
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Produces a new, distinguishable commit on every call.
///
/// Implementations must be safe to call repeatedly; each call has to change
/// the pushed head so the remote starts a new build.
pub trait CommitProducer: Send + Sync {
    /// Create and push an empty commit, returning its hash.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Commit`](crate::AppError::Commit) if the commit
    /// cannot be created or pushed.
    fn push_empty_commit(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}
