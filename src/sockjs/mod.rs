//! STOMP-over-`SockJS` websocket client.
//!
//! Only the subset of the protocol the bot exchanges is implemented:
//! `CONNECT`/`CONNECTED`, `SUBSCRIBE`, `MESSAGE`, `ERROR` and heartbeats.
//!
//! - `codec`: envelope grammar, [`Frame`](codec::Frame) decode/encode.
//! - `handshake`: open signal → `CONNECT` → `CONNECTED` exchange.
//! - `session`: socket ownership, event channels and idempotent close.
//! - `reader`: background read loop feeding the session's event channels.
//! - `heartbeat`: background ping loop.
//! - `subscription`: subscription ids and `SUBSCRIBE` frames.

pub mod codec;
pub mod handshake;
mod heartbeat;
mod reader;
pub mod session;
pub mod subscription;

pub use codec::{Command, Decoded, Frame};
pub use session::{Session, SessionCloser, SessionEvent, SessionOptions, SessionState};
pub use subscription::{Subscription, SubscriptionManager};
