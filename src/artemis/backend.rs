//! Production [`AttemptBackend`]: REST lookup, repository clone and
//! websocket session for every attempt.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use super::client::{ArtemisClient, TOKEN_COOKIE};
use crate::config::RetriggerSettings;
use crate::git::{GitCredentials, GitRepository};
use crate::orchestrator::supervisor::{AttemptBackend, AttemptResources};
use crate::sockjs::Session;
use crate::Result;

/// Starts attempts against a live service.
pub struct ArtemisBackend {
    settings: RetriggerSettings,
}

impl ArtemisBackend {
    /// Create a backend for the validated `settings`.
    #[must_use]
    pub fn new(settings: RetriggerSettings) -> Self {
        Self { settings }
    }

    fn client(&self) -> Result<ArtemisClient> {
        ArtemisClient::new(
            self.settings.target.api_base(),
            self.settings.credentials.clone(),
        )
    }

    async fn fetch_percentage(&self) -> Result<u32> {
        let client = self.client()?;
        let details = client
            .exercise_details(&self.settings.target.exercise_id)
            .await?;
        Ok(details.resolve()?.most_recent_score)
    }

    async fn open_attempt(&self) -> Result<AttemptResources> {
        let target = &self.settings.target;
        let client = self.client()?;
        let token = client.authenticate().await?;

        let exercise = client.exercise_details(&target.exercise_id).await?.resolve()?;
        debug!(
            exercise_id = %target.exercise_id,
            score = exercise.most_recent_score,
            "exercise resolved"
        );

        let credentials = GitCredentials {
            username: self.settings.credentials.username.clone(),
            password: self.settings.credentials.password.clone(),
        };
        let repository = GitRepository::clone_into(
            exercise.git_config(&self.settings.email_domain),
            &credentials,
            &self.settings.workdir,
        )
        .await?;

        let headers = [
            ("Origin".to_owned(), target.api_base()),
            ("Cookie".to_owned(), format!("{TOKEN_COOKIE}={}", token.raw())),
        ];
        let session = Session::open(
            &target.websocket_endpoint(),
            &headers,
            &self.settings.session,
        )
        .await?;
        info!(session_id = %session.id(), "attempt ready");

        Ok(AttemptResources {
            session,
            commits: Box::new(repository),
            current_percentage: exercise.most_recent_score,
        })
    }
}

impl AttemptBackend for ArtemisBackend {
    fn current_percentage(&self) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        Box::pin(self.fetch_percentage())
    }

    fn start_attempt(&self) -> Pin<Box<dyn Future<Output = Result<AttemptResources>> + Send + '_>> {
        Box::pin(self.open_attempt())
    }
}
