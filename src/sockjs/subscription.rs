//! Topic subscriptions.
//!
//! Ids are `"{session_id}-{n}"` with `n` drawn from a per-session atomic
//! counter starting at 1. A number is consumed even when the send fails,
//! so ids are never reused within one session.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::codec::{self, Command};
use super::session::Shared;
use crate::{AppError, Result};

/// A declared interest in one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Unique id within the owning session.
    pub id: String,
    /// Topic the server should deliver.
    pub destination: String,
}

/// Issues subscribe frames for one session.
#[derive(Debug)]
pub struct SubscriptionManager {
    session_id: String,
    counter: AtomicU64,
}

impl SubscriptionManager {
    /// Create a manager for the session with `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Allocate the next subscription id.
    #[must_use]
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n}", self.session_id)
    }

    /// Send a `SUBSCRIBE` frame for `destination`. No acknowledgement is awaited.
    pub(crate) async fn subscribe(&self, shared: &Shared, destination: &str) -> Result<Subscription> {
        let id = self.next_id();
        let frame = codec::encode(
            Command::Subscribe,
            &[("id", id.as_str()), ("destination", destination)],
        );

        shared.send_text(frame).await.map_err(|e| {
            AppError::Subscription(format!("failed to subscribe to {destination}: {e}"))
        })?;

        info!(session_id = %self.session_id, id = %id, destination, "subscribed");
        Ok(Subscription {
            id,
            destination: destination.to_owned(),
        })
    }
}
