//! Artemis service integration.
//!
//! - `exercise`: exercise URL parsing, endpoints and the details model.
//! - `token`: session token and its expiry.
//! - `client`: authentication and exercise lookup over REST.
//! - `backend`: per-attempt wiring of client, repository and websocket.

pub mod backend;
pub mod client;
pub mod exercise;
pub mod token;

pub use backend::ArtemisBackend;
pub use client::ArtemisClient;
pub use exercise::{ExerciseDetails, ExerciseTarget, ResolvedExercise};
pub use token::AuthToken;
