//! REST client for authentication and exercise lookup.
//!
//! Every request other than the login itself carries the session token as
//! the `jwt` cookie. [`ArtemisClient::token`] logs in again once the token
//! is within [`REFRESH_MARGIN`](super::token::REFRESH_MARGIN) of expiry; the
//! refresh runs under an async mutex, so concurrent callers wait for one
//! login instead of issuing several.

use std::time::Duration;

use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::exercise::ExerciseDetails;
use super::token::AuthToken;
use crate::config::Credentials;
use crate::{AppError, Result};

/// Name of the cookie carrying the session token.
pub const TOKEN_COOKIE: &str = "jwt";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateRequest<'a> {
    username: &'a str,
    password: &'a str,
    remember_me: bool,
}

/// Authenticated REST client for one service instance.
pub struct ArtemisClient {
    http: reqwest::Client,
    api_base: String,
    credentials: Credentials,
    token: Mutex<Option<AuthToken>>,
}

impl ArtemisClient {
    /// Create a client for the REST API rooted at `api_base`. No request is made.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Http`] if the HTTP client cannot be built.
    pub fn new(api_base: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Http(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            credentials,
            token: Mutex::new(None),
        })
    }

    /// Log in unconditionally and cache the new token.
    ///
    /// # Errors
    ///
    /// - [`AppError::Unauthorized`]: the credentials were rejected.
    /// - [`AppError::Http`]: transport failure, unexpected status, or no
    ///   token cookie in the response.
    pub async fn authenticate(&self) -> Result<AuthToken> {
        let mut cached = self.token.lock().await;
        let token = self.login().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// A token with more than the refresh margin of lifetime left.
    ///
    /// # Errors
    ///
    /// Same as [`Self::authenticate`] when a login is needed.
    pub async fn token(&self) -> Result<AuthToken> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.clone());
        }

        debug!("session token missing or about to expire, logging in");
        let token = self.login().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Fetch `GET /exercises/{id}/details`.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`]: the exercise does not exist.
    /// - [`AppError::Unauthorized`]: the token was rejected.
    /// - [`AppError::Http`]: transport failure or unexpected status.
    pub async fn exercise_details(&self, exercise_id: &str) -> Result<ExerciseDetails> {
        let token = self.token().await?;
        let url = format!("{}/exercises/{exercise_id}/details", self.api_base);

        let response = self
            .http
            .get(&url)
            .header(COOKIE, format!("{TOKEN_COOKIE}={}", token.raw()))
            .send()
            .await
            .map_err(|e| AppError::Http(format!("failed to fetch exercise {exercise_id}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(AppError::NotFound(format!("exercise {exercise_id}")));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::Unauthorized(format!(
                    "access to exercise {exercise_id} denied ({})",
                    response.status()
                )));
            }
            status if !status.is_success() => {
                return Err(AppError::Http(format!(
                    "unexpected status {status} for exercise {exercise_id}"
                )));
            }
            _ => {}
        }

        let details: ExerciseDetails = response.json().await.map_err(|e| {
            AppError::Http(format!("invalid details for exercise {exercise_id}: {e}"))
        })?;
        debug!(exercise_id, title = %details.title, "exercise details fetched");
        Ok(details)
    }

    async fn login(&self) -> Result<AuthToken> {
        let url = format!("{}/public/authenticate", self.api_base);
        let body = AuthenticateRequest {
            username: &self.credentials.username,
            password: &self.credentials.password,
            remember_me: true,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Http(format!("failed to authenticate: {e}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::Unauthorized(format!(
                    "credentials for {} rejected",
                    self.credentials.username
                )));
            }
            status if !status.is_success() => {
                return Err(AppError::Http(format!(
                    "unexpected status {status} from authentication"
                )));
            }
            _ => {}
        }

        let raw = token_cookie(&response)
            .ok_or_else(|| AppError::Http("authentication response carries no token".into()))?;
        let token = AuthToken::new(raw);
        info!(
            username = %self.credentials.username,
            expires_at = ?token.expires_at(),
            "authenticated"
        );
        Ok(token)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Value of the token cookie among the response's `Set-Cookie` headers.
fn token_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let pair = cookie.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            (name.trim() == TOKEN_COOKIE && !value.is_empty()).then(|| value.to_owned())
        })
}
