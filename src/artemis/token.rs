//! Session token issued by the authentication endpoint.
//!
//! The token is a JWT delivered as the `jwt` cookie. Only its `exp` claim
//! is read, without signature verification: the service is the only party
//! that checks it, the client only needs to know when to log in again.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Remaining lifetime below which the token is refreshed.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// A raw session token and its expiry, if the token carried one.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    raw: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// Wrap `raw`, reading the expiry from its payload when it is a JWT.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let expires_at = expiry_of(&raw);
        Self { raw, expires_at }
    }

    /// The token exactly as issued.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Expiry from the `exp` claim.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether more than `margin` of lifetime remains at `now`.
    ///
    /// A token without a readable expiry is never fresh, so it is replaced
    /// on every use instead of being trusted forever.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(margin)
            .is_some_and(|deadline| expires_at > deadline)
    }

    /// [`Self::is_fresh_at`] against the current time and [`REFRESH_MARGIN`].
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now(), REFRESH_MARGIN)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("raw", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn expiry_of(raw: &str) -> Option<DateTime<Utc>> {
    let payload = raw.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}
