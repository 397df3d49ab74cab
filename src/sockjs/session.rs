//! One physical websocket connection and its lifecycle.
//!
//! [`Session::open`] dials the endpoint and completes the handshake before
//! returning. Two background tasks then run until the session closes:
//!
//! - the reader ([`super::reader`]) decodes inbound payloads into the frame
//!   and error channels and detects peer closure;
//! - the heartbeat ([`super::heartbeat`]) sends a ping at the negotiated
//!   interval.
//!
//! The write half of the socket lives in a single async mutex shared by
//! pings, subscriptions and close. Closing takes the write half out of that
//! mutex, so whichever caller gets it first performs the close and fires
//! the closure token; every later caller finds `None` and returns. The
//! reader owns the read half and stops as soon as the closure token fires,
//! which unblocks any in-flight read.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::codec::Frame;
use super::subscription::{Subscription, SubscriptionManager};
use super::{handshake, heartbeat, reader};
use crate::{AppError, Result};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Capacity of the inbound frame and error channels.
const EVENT_CAPACITY: usize = 64;

/// Upper bound on the close handshake with the peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on one outbound write while the write half is held.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a session. No transition leaves [`SessionState::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket is being opened or the handshake is in progress.
    Connecting,
    /// Handshake complete; frames flow.
    Connected,
    /// Close has started; the write half is being released.
    Closing,
    /// Socket and background tasks released.
    Closed,
}

/// Client-side connection settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Heart-beat cadence advertised in `CONNECT`.
    pub heartbeat: Duration,
    /// Deadline for the whole connect handshake.
    pub handshake_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// Something that happened on the session, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded inbound frame.
    Frame(Frame),
    /// A parse, read or ping failure. Not terminal on its own.
    Error(AppError),
    /// The session closed, either on request or because the peer went away.
    Closed,
}

/// State shared between the session handle and its background tasks.
pub(crate) struct Shared {
    session_id: String,
    sink: Mutex<Option<WsSink>>,
    state: watch::Sender<SessionState>,
    closed: CancellationToken,
}

impl Shared {
    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Write one text payload, serialised with every other writer and close.
    pub(crate) async fn send_text(&self, text: String) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| AppError::Connection("session is closed".into()))?;
        send_within(sink, Message::text(text), WRITE_TIMEOUT).await
    }

    /// Release the write half and fire the closure token.
    ///
    /// Returns `false` when another caller already closed the session.
    pub(crate) async fn shutdown(&self, reason: &str) -> bool {
        let mut guard = self.sink.lock().await;
        let Some(mut sink) = guard.take() else {
            return false;
        };

        self.transition(SessionState::Closing);
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(session_id = %self.session_id, %err, "close frame not delivered"),
            Err(_) => debug!(session_id = %self.session_id, "close handshake timed out"),
        }
        drop(sink);
        drop(guard);

        self.closed.cancel();
        self.transition(SessionState::Closed);
        info!(session_id = %self.session_id, reason, "session closed");
        true
    }

    fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == SessionState::Closed || *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Cloneable handle that can close a session from another task.
#[derive(Clone)]
pub struct SessionCloser {
    shared: Arc<Shared>,
}

impl SessionCloser {
    /// Close the session. Idempotent.
    pub async fn close(&self) {
        self.shared.shutdown("closed by client").await;
    }
}

/// An open, handshaken connection.
pub struct Session {
    shared: Arc<Shared>,
    heartbeat_interval: Duration,
    subscriptions: SubscriptionManager,
    frames: mpsc::Receiver<Frame>,
    errors: mpsc::Receiver<AppError>,
}

impl Session {
    /// Dial `endpoint`, attach `headers` to the upgrade request and complete
    /// the handshake.
    ///
    /// # Errors
    ///
    /// - [`AppError::Connection`]: the endpoint, a header or the socket is
    ///   unusable.
    /// - [`AppError::Handshake`]: the server did not complete the handshake.
    pub async fn open(
        endpoint: &str,
        headers: &[(String, String)],
        options: &SessionOptions,
    ) -> Result<Self> {
        let mut request = endpoint.into_client_request()?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Connection(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::Connection(format!("invalid value for header {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (state, _) = watch::channel(SessionState::Connecting);
        debug!(endpoint, "opening websocket");
        let (socket, _response) = connect_async(request).await?;
        let (mut sink, mut source) = socket.split();

        let negotiated = handshake::perform(
            &mut sink,
            &mut source,
            options.heartbeat,
            options.handshake_timeout,
        )
        .await?;

        let shared = Arc::new(Shared {
            session_id: negotiated.session_id.clone(),
            sink: Mutex::new(Some(sink)),
            state,
            closed: CancellationToken::new(),
        });
        shared.transition(SessionState::Connected);

        let (frame_tx, frames) = mpsc::channel(EVENT_CAPACITY);
        let (error_tx, errors) = mpsc::channel(EVENT_CAPACITY);

        tokio::spawn(
            reader::run_reader(Arc::clone(&shared), source, frame_tx, error_tx.clone())
                .instrument(info_span!("sockjs_reader", session_id = %negotiated.session_id)),
        );
        tokio::spawn(
            heartbeat::run_heartbeat(
                Arc::clone(&shared),
                negotiated.heartbeat_interval,
                error_tx,
            )
            .instrument(info_span!("sockjs_heartbeat", session_id = %negotiated.session_id)),
        );

        Ok(Self {
            subscriptions: SubscriptionManager::new(negotiated.session_id),
            shared,
            heartbeat_interval: negotiated.heartbeat_interval,
            frames,
            errors,
        })
    }

    /// Session id assigned by the server.
    #[must_use]
    pub fn id(&self) -> &str {
        self.shared.session_id()
    }

    /// Negotiated ping interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Whether the closure signal has fired.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Handle for closing this session from another task.
    #[must_use]
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Subscribe to `destination`. The server does not acknowledge.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Subscription`] if the frame cannot be sent.
    pub async fn subscribe(&self, destination: &str) -> Result<Subscription> {
        self.subscriptions.subscribe(&self.shared, destination).await
    }

    /// Wait for whichever of frame, error or closure is ready first.
    ///
    /// Frames already buffered when closure is observed are still delivered
    /// before [`SessionEvent::Closed`]. After closure every call returns
    /// `Closed` immediately.
    pub async fn next_event(&mut self) -> SessionEvent {
        let closed = self.shared.closed_token();
        tokio::select! {
            Some(frame) = self.frames.recv() => SessionEvent::Frame(frame),
            Some(err) = self.errors.recv() => SessionEvent::Error(err),
            () = closed.cancelled() => match self.frames.try_recv() {
                Ok(frame) => SessionEvent::Frame(frame),
                Err(_) => SessionEvent::Closed,
            },
        }
    }

    /// Close the socket and signal closure. Idempotent, and safe to race
    /// with the reader noticing the peer went away.
    pub async fn close(&self) {
        self.shared.shutdown("closed by client").await;
    }
}

/// Send `message`, failing with [`AppError::Connection`] after `limit`.
async fn send_within<S>(sink: &mut S, message: Message, limit: Duration) -> Result<()>
where
    S: Sink<Message> + Unpin,
    AppError: From<S::Error>,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(sent) => sent.map_err(AppError::from),
        Err(_) => Err(AppError::Connection(format!(
            "write timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stops both background tasks; they release the write half with `shared`.
        self.shared.closed.cancel();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
