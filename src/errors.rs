//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Variants split into two classes. [`AppError::is_fatal`] errors are
/// detected before any retry is worthwhile (bad settings, rejected
/// credentials, unknown exercise) and stop the process. Everything else is
/// recoverable at the supervisor level by starting a fresh attempt.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Credentials were rejected by the remote service.
    Unauthorized(String),
    /// Requested exercise or participation does not exist.
    NotFound(String),
    /// Malformed frame text on the websocket.
    Parse(String),
    /// The connect handshake did not follow the expected exchange.
    Handshake(String),
    /// Socket open, read, write failure or unexpected closure.
    Connection(String),
    /// A subscribe frame could not be sent.
    Subscription(String),
    /// Cloning, committing or pushing the retrigger commit failed.
    Commit(String),
    /// REST transport failure or unexpected HTTP status.
    Http(String),
    /// File-system or process I/O failure.
    Io(String),
}

impl AppError {
    /// Whether the error must terminate the process instead of being retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Unauthorized(_) | Self::NotFound(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Subscription(msg) => write!(f, "subscription: {msg}"),
            Self::Commit(msg) => write!(f, "commit: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
