//! Frame codec for STOMP frames wrapped in `SockJS` array envelopes.
//!
//! Every websocket text message is either one of two control sentinels or
//! an envelope holding exactly one STOMP frame:
//!
//! ```text
//! o                                        open signal
//! a["\n"]                                  heartbeat envelope
//! a["MESSAGE\nkey:value\n\n{\"k\":1}\u0000"]
//! ```
//!
//! The escapes are literal text (a backslash followed by `n`, `"` or
//! `u0000`), not control characters. Outgoing envelopes omit the leading
//! `a`; inbound envelopes may carry it or not.
//!
//! Decoding is a small hand-written parser rather than one large pattern
//! so that every failure names the stage that rejected the input.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Escaped newline separating the command, header lines and body.
const NEWLINE: &str = r"\n";

/// Escaped NUL terminating every frame body.
const NUL: &str = r"\u0000";

/// Escaped double quote inside the envelope string.
const ESCAPED_QUOTE: &str = r#"\""#;

/// Raw open signal sent by the server right after the socket opens.
const OPEN_SIGNAL: &str = "o";

/// Ping envelope sent by the client to keep the session alive.
pub const HEARTBEAT_ENVELOPE: &str = r#"["\n"]"#;

/// Frame commands exchanged by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client → server connection request.
    Connect,
    /// Server → client handshake acknowledgement.
    Connected,
    /// Client → server topic subscription.
    Subscribe,
    /// Server → client topic notification.
    Message,
    /// Server → client protocol error report.
    Error,
}

impl Command {
    /// Wire token for this command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "CONNECT" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "MESSAGE" => Some(Self::Message),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Header map; keys are unique within a frame.
    pub headers: BTreeMap<String, String>,
    /// JSON object body, present only on data-bearing frames.
    pub body: Option<Map<String, Value>>,
}

impl Frame {
    /// Build a body-less frame from a command and header pairs.
    #[must_use]
    pub fn new<K, V>(command: Command, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            command,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            body: None,
        }
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The `destination` header, if any.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }

    /// Serialize this frame into a single outgoing envelope.
    ///
    /// Headers are written in key order so encoding is deterministic.
    /// Double quotes inside the body are escaped; no other escaping is
    /// applied, matching what [`decode`] reverses.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut inner = String::from(self.command.as_str());
        inner.push_str(NEWLINE);
        for (name, value) in &self.headers {
            inner.push_str(name);
            inner.push(':');
            inner.push_str(value);
            inner.push_str(NEWLINE);
        }
        inner.push_str(NEWLINE);
        if let Some(body) = &self.body {
            let json = Value::Object(body.clone()).to_string();
            inner.push_str(&json.replace('"', ESCAPED_QUOTE));
        }
        inner.push_str(NUL);
        format!(r#"["{inner}"]"#)
    }
}

/// Outcome of decoding one raw websocket payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The bare open signal.
    Open,
    /// An empty heartbeat envelope.
    Heartbeat,
    /// A complete frame.
    Frame(Frame),
}

impl Decoded {
    /// Discard the sentinels and keep only real frames.
    #[must_use]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            Self::Open | Self::Heartbeat => None,
        }
    }
}

/// Encode a body-less control frame (connect, subscribe).
#[must_use]
pub fn encode(command: Command, headers: &[(&str, &str)]) -> String {
    Frame::new(command, headers.iter().copied()).encode()
}

/// Decode one raw websocket text payload.
///
/// # Errors
///
/// Returns [`AppError::Parse`] carrying the offending raw text when the
/// payload is neither a sentinel nor a well-formed envelope, when the
/// command is not recognised, or when a non-empty body is not a JSON object.
pub fn decode(raw: &str) -> Result<Decoded> {
    if raw == OPEN_SIGNAL {
        return Ok(Decoded::Open);
    }

    let inner = unwrap_envelope(raw)?;
    if inner == NEWLINE {
        return Ok(Decoded::Heartbeat);
    }

    let content = inner
        .strip_suffix(NUL)
        .ok_or_else(|| parse_error("frame is not NUL-terminated", raw))?;

    let (token, rest) = content
        .split_once(NEWLINE)
        .ok_or_else(|| parse_error("missing command line", raw))?;
    let command = Command::from_token(token)
        .ok_or_else(|| parse_error(&format!("unknown command {token:?}"), raw))?;

    let (headers, body) = split_headers(rest, raw)?;
    let body = decode_body(body, raw)?;

    Ok(Decoded::Frame(Frame {
        command,
        headers,
        body,
    }))
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Strip the optional `a` prefix and the `["` … `"]` array wrapper.
fn unwrap_envelope(raw: &str) -> Result<&str> {
    let array = raw.strip_prefix('a').unwrap_or(raw);
    array
        .strip_prefix(r#"[""#)
        .and_then(|s| s.strip_suffix(r#""]"#))
        .ok_or_else(|| parse_error("not a single-string array envelope", raw))
}

/// Consume `name:value\n` lines up to the blank line and return the rest as body.
fn split_headers<'a>(mut rest: &'a str, raw: &str) -> Result<(BTreeMap<String, String>, &'a str)> {
    let mut headers = BTreeMap::new();

    loop {
        let (line, tail) = rest
            .split_once(NEWLINE)
            .ok_or_else(|| parse_error("unterminated header block", raw))?;
        rest = tail;

        if line.is_empty() {
            return Ok((headers, rest));
        }

        // Only the first colon separates name from value.
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| parse_error(&format!("header line without colon {line:?}"), raw))?;
        if name.is_empty() {
            return Err(parse_error("empty header name", raw));
        }
        headers.insert(name.to_owned(), value.to_owned());
    }
}

fn decode_body(body: &str, raw: &str) -> Result<Option<Map<String, Value>>> {
    if body.is_empty() {
        return Ok(None);
    }

    let unescaped = body.replace(ESCAPED_QUOTE, "\"");
    serde_json::from_str::<Map<String, Value>>(&unescaped)
        .map(Some)
        .map_err(|e| parse_error(&format!("body is not a JSON object: {e}"), raw))
}

fn parse_error(reason: &str, raw: &str) -> AppError {
    AppError::Parse(format!("{reason}: {raw}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
