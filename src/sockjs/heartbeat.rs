//! Periodic ping task.
//!
//! Sends [`HEARTBEAT_ENVELOPE`] at the negotiated interval until the
//! session closes. A failed ping is reported on the error channel, waiting
//! for room if it is full, and the task keeps ticking; it is the reader that
//! decides the socket is dead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::codec::HEARTBEAT_ENVELOPE;
use super::reader::forward;
use super::session::Shared;
use crate::AppError;

/// Ping loop spawned by [`super::session::Session::open`].
pub(crate) async fn run_heartbeat(
    shared: Arc<Shared>,
    period: Duration,
    error_tx: mpsc::Sender<AppError>,
) {
    let closed = shared.closed_token();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = closed.cancelled() => {
                debug!("heartbeat: closure signalled, stopping");
                break;
            }
            _ = ticker.tick() => {
                match shared.send_text(HEARTBEAT_ENVELOPE.to_owned()).await {
                    Ok(()) => trace!("heartbeat: ping sent"),
                    Err(err) => {
                        warn!(%err, "heartbeat: ping failed");
                        let failure = AppError::Connection(format!("ping failed: {err}"));
                        if !forward(&closed, &error_tx, failure).await {
                            break;
                        }
                    }
                }
            }
        }
    }
}
