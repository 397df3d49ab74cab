//! Session reader task.
//!
//! Owns the read half of the socket. Each text payload is decoded with
//! [`codec::decode`]: frames go to the frame channel, parse failures go to
//! the error channel, sentinels are dropped. Parse failures never stop the
//! reader.
//!
//! The reader stops when:
//! - the closure token fires (explicit close), or
//! - the peer closes the socket or the read fails, in which case the reader
//!   performs the close itself so closure is signalled exactly once.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::codec::{self, Decoded, Frame};
use super::session::{Shared, WsSource};
use crate::AppError;

/// Read loop spawned by [`super::session::Session::open`].
pub(crate) async fn run_reader(
    shared: Arc<Shared>,
    mut source: WsSource,
    frame_tx: mpsc::Sender<Frame>,
    error_tx: mpsc::Sender<AppError>,
) {
    let closed = shared.closed_token();

    loop {
        let item = tokio::select! {
            () = closed.cancelled() => {
                debug!("sockjs reader: closure signalled, stopping");
                break;
            }
            item = source.next() => item,
        };

        match item {
            None => {
                debug!("sockjs reader: stream ended");
                shared.shutdown("peer closed the connection").await;
                break;
            }

            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "sockjs reader: close frame received");
                shared.shutdown("peer sent a close frame").await;
                break;
            }

            Some(Err(err)) => {
                warn!(%err, "sockjs reader: read failed, closing session");
                forward(&closed, &error_tx, AppError::from(err)).await;
                shared.shutdown("read failure").await;
                break;
            }

            Some(Ok(Message::Text(text))) => match codec::decode(text.as_str()) {
                Ok(Decoded::Frame(frame)) => {
                    trace!(command = %frame.command, "sockjs reader: frame received");
                    if !forward(&closed, &frame_tx, frame).await {
                        break;
                    }
                }
                Ok(Decoded::Heartbeat) => trace!("sockjs reader: heartbeat received"),
                Ok(Decoded::Open) => debug!("sockjs reader: ignoring repeated open signal"),
                Err(err) => {
                    warn!(%err, "sockjs reader: parse error, frame dropped");
                    if !forward(&closed, &error_tx, err).await {
                        break;
                    }
                }
            },

            Some(Ok(other)) => trace!(?other, "sockjs reader: ignoring non-text message"),
        }
    }
}

/// Deliver `item` unless the session closes or the receiver is gone first.
pub(super) async fn forward<T>(
    closed: &CancellationToken,
    tx: &mpsc::Sender<T>,
    item: T,
) -> bool {
    tokio::select! {
        () = closed.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
