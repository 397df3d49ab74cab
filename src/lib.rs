#![forbid(unsafe_code)]

//! Retrigger Artemis programming exercise builds until a target score is
//! reached, driven by the service's STOMP-over-`SockJS` notifications.

pub mod artemis;
pub mod config;
pub mod errors;
pub mod git;
pub mod orchestrator;
pub mod sockjs;

pub use config::BotConfig;
pub use errors::{AppError, Result};
