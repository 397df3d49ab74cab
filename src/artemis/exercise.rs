//! Exercise addressing and the exercise details model.

use regex::Regex;
use serde::Deserialize;

use crate::git::GitConfig;
use crate::{AppError, Result};

/// Exercise page URL: `https?://<host>/courses/<course>/exercises/<exercise>`.
const EXERCISE_URL_PATTERN: &str = r"^https?://.+/courses/(\d*)/exercises/(\d*)/?";

/// Channel suffix appended to the websocket base.
const WEBSOCKET_SUFFIX: &str = "/websocket/0/a/websocket";

/// The exercise to retrigger, as addressed by its page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseTarget {
    /// Numeric course id.
    pub course_id: String,
    /// Numeric exercise id.
    pub exercise_id: String,
    /// `scheme://host[:port]` of the service.
    pub origin: String,
}

impl ExerciseTarget {
    /// Extract course id, exercise id and service origin from an exercise URL.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the URL does not name both ids.
    pub fn parse(url: &str) -> Result<Self> {
        let pattern = Regex::new(EXERCISE_URL_PATTERN)
            .map_err(|e| AppError::Config(format!("invalid exercise url pattern: {e}")))?;
        let invalid = || {
            AppError::Config(format!(
                "cannot extract course and exercise id from {url:?}"
            ))
        };

        let captures = pattern.captures(url).ok_or_else(invalid)?;
        let course_id = captures.get(1).map_or("", |m| m.as_str());
        let exercise_id = captures.get(2).map_or("", |m| m.as_str());
        if course_id.is_empty() || exercise_id.is_empty() {
            return Err(invalid());
        }

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AppError::Config(format!("invalid exercise url {url:?}: {e}")))?;
        let origin = parsed.origin().ascii_serialization();

        Ok(Self {
            course_id: course_id.to_owned(),
            exercise_id: exercise_id.to_owned(),
            origin,
        })
    }

    /// REST base, e.g. `https://host/api`.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}/api", self.origin)
    }

    /// Websocket endpoint, e.g. `wss://host/websocket/0/a/websocket`.
    #[must_use]
    pub fn websocket_endpoint(&self) -> String {
        let ws_origin = if let Some(rest) = self.origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.origin.clone()
        };
        format!("{ws_origin}{WEBSOCKET_SUFFIX}")
    }
}

/// Subset of `GET /exercises/{id}/details` the bot relies on.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseDetails {
    /// Exercise id.
    #[serde(default)]
    pub id: u64,
    /// Exercise title.
    #[serde(default)]
    pub title: String,
    /// Participations of the authenticated student.
    #[serde(default)]
    pub student_participations: Vec<Participation>,
}

/// One student participation in an exercise.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    /// Clone URL of the participation repository.
    #[serde(default)]
    pub repository_uri: String,
    /// Branch the build pipeline watches.
    #[serde(default)]
    pub branch: String,
    /// Display name of the participant.
    #[serde(default)]
    pub participant_name: String,
    /// Login of the participant.
    #[serde(default)]
    pub participant_identifier: String,
    /// Build results, in no particular order.
    #[serde(default)]
    pub results: Vec<BuildResult>,
}

/// One evaluated build.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildResult {
    /// Monotonic result id; the highest is the most recent.
    pub id: u64,
    /// Score in percent.
    #[serde(default)]
    pub score: f64,
}

/// The fields of an exercise the retrigger loop needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExercise {
    /// Clone URL of the participation repository.
    pub repository_url: String,
    /// Branch the build pipeline watches.
    pub branch: String,
    /// Display name used as commit author.
    pub participant_name: String,
    /// Login used for the commit email.
    pub participant_identifier: String,
    /// Score of the most recent result, 0 when there is none.
    pub most_recent_score: u32,
}

impl ResolvedExercise {
    /// Commit identity and location for retrigger commits.
    #[must_use]
    pub fn git_config(&self, email_domain: &str) -> GitConfig {
        GitConfig {
            url: self.repository_url.clone(),
            branch: self.branch.clone(),
            name: self.participant_name.clone(),
            email: format!("{}@{email_domain}", self.participant_identifier),
        }
    }
}

impl ExerciseDetails {
    /// The first participation, which is the authenticated student's.
    #[must_use]
    pub fn participation(&self) -> Option<&Participation> {
        self.student_participations.first()
    }

    /// Score of the result with the highest id, truncated. 0 without results.
    #[must_use]
    pub fn most_recent_score(&self) -> u32 {
        self.participation()
            .and_then(|p| p.results.iter().max_by_key(|r| r.id))
            .map_or(0, |r| truncate_score(r.score))
    }

    /// Reduce to the fields the retrigger loop needs.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] when the student has not started the
    /// exercise.
    pub fn resolve(&self) -> Result<ResolvedExercise> {
        let participation = self.participation().ok_or_else(|| {
            AppError::NotFound(format!("no participation in exercise {}", self.id))
        })?;
        if participation.repository_uri.is_empty() {
            return Err(AppError::NotFound(format!(
                "participation in exercise {} has no repository",
                self.id
            )));
        }

        Ok(ResolvedExercise {
            repository_url: participation.repository_uri.clone(),
            branch: participation.branch.clone(),
            participant_name: participation.participant_name.clone(),
            participant_identifier: participation.participant_identifier.clone(),
            most_recent_score: self.most_recent_score(),
        })
    }
}

/// Truncate a percentage toward zero. Negative and non-finite scores map to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to the u32 range first.
pub fn truncate_score(score: f64) -> u32 {
    if !score.is_finite() || score <= 0.0 {
        return 0;
    }
    score.trunc().min(f64::from(u32::MAX)) as u32
}
