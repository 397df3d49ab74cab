//! STOMP connect handshake over a freshly opened `SockJS` websocket.
//!
//! The exchange is strictly ordered:
//!
//! 1. The server sends the bare open signal `o`.
//! 2. The client sends `CONNECT` advertising protocol version `1.2` and the
//!    heart-beat cadence it would like.
//! 3. The server answers `CONNECTED` with a `session` id and a
//!    `heart-beat` header of the form `<ms>,<ms>`.
//!
//! Only the first heart-beat value is consumed; it becomes the client's
//! ping cadence. All steps share one deadline. The caller must not start
//! the reader or heartbeat tasks until [`perform`] returns.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use super::codec::{self, Command, Decoded, Frame};
use crate::{AppError, Result};

/// Protocol version advertised in `CONNECT`.
pub const ACCEPT_VERSION: &str = "1.2";

/// Parameters negotiated during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Opaque session id assigned by the server.
    pub session_id: String,
    /// Interval between client pings.
    pub heartbeat_interval: Duration,
}

/// Build the `CONNECT` envelope asking for `heartbeat` in both directions.
#[must_use]
pub fn connect_frame(heartbeat: Duration) -> String {
    let millis = heartbeat.as_millis();
    let cadence = format!("{millis},{millis}");
    codec::encode(
        Command::Connect,
        &[("accept-version", ACCEPT_VERSION), ("heart-beat", &cadence)],
    )
}

/// Parse a `heart-beat` header value into the client ping interval.
///
/// # Errors
///
/// Returns [`AppError::Handshake`] unless the value is exactly two
/// comma-separated non-negative integers with a positive first element.
pub fn parse_heart_beat(value: &str) -> Result<Duration> {
    let mut parts = value.split(',');
    let (Some(first), Some(second), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AppError::Handshake(format!(
            "invalid heart-beat format: {value:?}"
        )));
    };

    let millis: u64 = first.trim().parse().map_err(|e| {
        AppError::Handshake(format!("invalid heart-beat interval {first:?}: {e}"))
    })?;
    second.trim().parse::<u64>().map_err(|e| {
        AppError::Handshake(format!("invalid heart-beat interval {second:?}: {e}"))
    })?;
    if millis == 0 {
        return Err(AppError::Handshake(
            "server negotiated a zero heart-beat interval".into(),
        ));
    }

    Ok(Duration::from_millis(millis))
}

/// Extract the negotiated parameters from a `CONNECTED` frame.
///
/// # Errors
///
/// Returns [`AppError::Handshake`] if the frame is not `CONNECTED` or is
/// missing (or has an empty) `session` or `heart-beat` header.
pub fn negotiate(frame: &Frame) -> Result<Negotiated> {
    if frame.command != Command::Connected {
        return Err(AppError::Handshake(format!(
            "expected CONNECTED, got {}",
            frame.command
        )));
    }

    let session_id = frame
        .header("session")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Handshake("session id not found in CONNECTED frame".into()))?;
    let heart_beat = frame
        .header("heart-beat")
        .ok_or_else(|| AppError::Handshake("heart-beat not found in CONNECTED frame".into()))?;

    Ok(Negotiated {
        session_id: session_id.to_owned(),
        heartbeat_interval: parse_heart_beat(heart_beat)?,
    })
}

/// Run the full handshake on an already opened socket.
///
/// # Errors
///
/// - [`AppError::Handshake`]: the server deviated from the expected
///   exchange or `timeout` elapsed.
/// - [`AppError::Connection`]: the socket failed or closed mid-handshake.
/// - [`AppError::Parse`]: a handshake payload was not a valid envelope.
pub async fn perform<W, R>(
    sink: &mut W,
    source: &mut R,
    heartbeat: Duration,
    timeout: Duration,
) -> Result<Negotiated>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(timeout, exchange(sink, source, heartbeat))
        .await
        .map_err(|_| {
            AppError::Handshake(format!("no CONNECTED frame within {timeout:?}"))
        })?
}

// ── Private helpers ───────────────────────────────────────────────────────────

async fn exchange<W, R>(sink: &mut W, source: &mut R, heartbeat: Duration) -> Result<Negotiated>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    match codec::decode(&next_text(source).await?)? {
        Decoded::Open => debug!("handshake: open signal received"),
        other => {
            return Err(AppError::Handshake(format!(
                "expected open signal, got {other:?}"
            )))
        }
    }

    sink.send(Message::text(connect_frame(heartbeat))).await?;
    debug!("handshake: CONNECT sent");

    let frame = codec::decode(&next_text(source).await?)?
        .into_frame()
        .ok_or_else(|| AppError::Handshake("expected CONNECTED, got a control sentinel".into()))?;
    let negotiated = negotiate(&frame)?;

    info!(
        session_id = %negotiated.session_id,
        heartbeat_ms = u64::try_from(negotiated.heartbeat_interval.as_millis()).unwrap_or(u64::MAX),
        "handshake: CONNECTED received"
    );
    Ok(negotiated)
}

/// Read the next text message, skipping websocket-level ping/pong traffic.
async fn next_text<R>(source: &mut R) -> Result<String>
where
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match source.next().await {
            None | Some(Ok(Message::Close(_))) => {
                return Err(AppError::Connection(
                    "socket closed during handshake".into(),
                ))
            }
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(other)) => debug!(?other, "handshake: skipping non-text message"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
