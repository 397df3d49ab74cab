//! Configuration parsing, overrides, credential loading and validation.
//!
//! Settings come from three layers, later layers winning: the optional
//! TOML file, then command-line flags and `ARTEMISBOT_*` environment
//! variables (bound by the CLI), then, for credentials only, the OS
//! keychain as a fallback when nothing else supplied them.

use std::env;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::artemis::ExerciseTarget;
use crate::orchestrator::{RetriggerTiming, SupervisorSettings};
use crate::sockjs::SessionOptions;
use crate::{AppError, Result};

/// Keychain service holding the `username` and `password` entries.
pub const KEYRING_SERVICE: &str = "artemisbot";

/// Config file looked up in the home directory.
pub const CONFIG_FILE_NAME: &str = ".artemisbot.toml";

/// Login for both the REST API and the repository host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_desired_percentage() -> i64 {
    100
}

fn default_workdir() -> PathBuf {
    env::temp_dir().join("artemisbot")
}

fn default_email_domain() -> String {
    "mytum.de".into()
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_result_delay_millis() -> u64 {
    1000
}

fn default_heartbeat_millis() -> u64 {
    10_000
}

fn default_handshake_timeout_seconds() -> u64 {
    30
}

/// Raw configuration as read from `.artemisbot.toml`.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BotConfig {
    /// Login name.
    #[serde(default)]
    pub username: Option<String>,
    /// Password. Prefer the keychain over storing it here.
    #[serde(default)]
    pub password: Option<String>,
    /// Exercise page URL.
    #[serde(default)]
    pub exercise_url: Option<String>,
    /// Score at which to stop.
    #[serde(default = "default_desired_percentage")]
    pub desired_percentage: i64,
    /// Parent directory of the temporary clones.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Domain appended to the participant login for the commit email.
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
    /// Pause between failed attempts.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// Back-off after a result below target.
    #[serde(default = "default_result_delay_millis")]
    pub result_delay_millis: u64,
    /// Heart-beat cadence requested from the server.
    #[serde(default = "default_heartbeat_millis")]
    pub heartbeat_millis: u64,
    /// Deadline for the websocket handshake.
    #[serde(default = "default_handshake_timeout_seconds")]
    pub handshake_timeout_seconds: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            exercise_url: None,
            desired_percentage: default_desired_percentage(),
            workdir: default_workdir(),
            email_domain: default_email_domain(),
            retry_delay_seconds: default_retry_delay_seconds(),
            result_delay_millis: default_result_delay_millis(),
            heartbeat_millis: default_heartbeat_millis(),
            handshake_timeout_seconds: default_handshake_timeout_seconds(),
        }
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("exercise_url", &self.exercise_url)
            .field("desired_percentage", &self.desired_percentage)
            .field("workdir", &self.workdir)
            .field("email_domain", &self.email_domain)
            .field("retry_delay_seconds", &self.retry_delay_seconds)
            .field("result_delay_millis", &self.result_delay_millis)
            .field("heartbeat_millis", &self.heartbeat_millis)
            .field("handshake_timeout_seconds", &self.handshake_timeout_seconds)
            .finish()
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--username` / `ARTEMISBOT_USERNAME`.
    pub username: Option<String>,
    /// `--password` / `ARTEMISBOT_PASSWORD`.
    pub password: Option<String>,
    /// `--artemis-url` / `ARTEMISBOT_ARTEMIS_URL`.
    pub exercise_url: Option<String>,
    /// `--percentage` / `ARTEMISBOT_PERCENTAGE`.
    pub desired_percentage: Option<i64>,
    /// `--workdir` / `ARTEMISBOT_WORKDIR`.
    pub workdir: Option<PathBuf>,
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RetriggerSettings {
    /// Exercise to retrigger and the service it lives on.
    pub target: ExerciseTarget,
    /// Login for REST and git.
    pub credentials: Credentials,
    /// Score at which to stop.
    pub desired_percentage: u32,
    /// Parent directory of the temporary clones.
    pub workdir: PathBuf,
    /// Commit email domain.
    pub email_domain: String,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
    /// Delays inside an attempt.
    pub timing: RetriggerTiming,
    /// Websocket session options.
    pub session: SessionOptions,
}

impl RetriggerSettings {
    /// Supervisor tuning derived from these settings.
    #[must_use]
    pub fn supervisor(&self) -> SupervisorSettings {
        SupervisorSettings {
            desired_percentage: self.desired_percentage,
            retry_delay: self.retry_delay,
            timing: self.timing,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        Ok(config)
    }

    /// Load `explicit` if given, else `$HOME/.artemisbot.toml` if it exists,
    /// else defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a chosen file cannot be read or parsed.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        match home_config_path() {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "using home config");
                Self::load_from_path(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Replace file values with every override that is set.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(username) = overrides.username {
            self.username = Some(username);
        }
        if let Some(password) = overrides.password {
            self.password = Some(password);
        }
        if let Some(url) = overrides.exercise_url {
            self.exercise_url = Some(url);
        }
        if let Some(percentage) = overrides.desired_percentage {
            self.desired_percentage = percentage;
        }
        if let Some(workdir) = overrides.workdir {
            self.workdir = workdir;
        }
    }

    /// Use `credentials` regardless of any configured values.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.username = Some(credentials.username);
        self.password = Some(credentials.password);
    }

    /// Fill missing credentials from the OS keychain.
    ///
    /// Lookup failures are logged and leave the value missing; validation
    /// reports what is still absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain task panicked.
    pub async fn load_credentials(&mut self) -> Result<()> {
        if is_blank(self.username.as_deref()) {
            self.username = load_keyring_credential("username").await?;
        }
        if is_blank(self.password.as_deref()) {
            self.password = load_keyring_credential("password").await?;
        }
        Ok(())
    }

    /// Check everything needed before any network access.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for missing credentials, a missing or
    /// malformed exercise URL, a non-positive percentage or zero timings.
    pub fn validate(&self) -> Result<RetriggerSettings> {
        let username = self.username.as_deref().unwrap_or_default().trim();
        let password = self.password.as_deref().unwrap_or_default();
        if username.is_empty() || password.is_empty() {
            return Err(AppError::Config("username and password are required".into()));
        }

        let url = self
            .exercise_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::Config("exercise url is required".into()))?;
        let target = ExerciseTarget::parse(url)?;

        if self.desired_percentage <= 0 {
            return Err(AppError::Config(format!(
                "desired percentage must be greater than zero, got {}",
                self.desired_percentage
            )));
        }
        let desired_percentage = u32::try_from(self.desired_percentage).map_err(|_| {
            AppError::Config(format!(
                "desired percentage {} is out of range",
                self.desired_percentage
            ))
        })?;

        if self.email_domain.trim().is_empty() {
            return Err(AppError::Config("email_domain must not be empty".into()));
        }
        if self.heartbeat_millis == 0 {
            return Err(AppError::Config(
                "heartbeat_millis must be greater than zero".into(),
            ));
        }
        if self.handshake_timeout_seconds == 0 {
            return Err(AppError::Config(
                "handshake_timeout_seconds must be greater than zero".into(),
            ));
        }

        Ok(RetriggerSettings {
            target,
            credentials: Credentials {
                username: username.to_owned(),
                password: password.to_owned(),
            },
            desired_percentage,
            workdir: self.workdir.clone(),
            email_domain: self.email_domain.trim().to_owned(),
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
            timing: RetriggerTiming {
                after_result: Duration::from_millis(self.result_delay_millis),
                ..RetriggerTiming::default()
            },
            session: SessionOptions {
                heartbeat: Duration::from_millis(self.heartbeat_millis),
                handshake_timeout: Duration::from_secs(self.handshake_timeout_seconds),
            },
        })
    }
}

/// Read a username and password from `input`, prompting on `output`.
///
/// # Errors
///
/// Returns `AppError::Io` if reading or writing fails and
/// `AppError::Config` if input ends early.
pub fn read_credentials(input: &mut impl BufRead, output: &mut impl Write) -> Result<Credentials> {
    let username = prompt_line(input, output, "Username: ")?;
    let password = prompt_line(input, output, "Password: ")?;
    Ok(Credentials { username, password })
}

/// Read the username from `input` and the password through `read_password`.
///
/// `read_password` receives the prompt and must read without echo.
///
/// # Errors
///
/// Returns `AppError::Io` if reading or writing fails and
/// `AppError::Config` if input ends before the username.
pub fn read_credentials_with(
    input: &mut impl BufRead,
    output: &mut impl Write,
    read_password: impl FnOnce(&str) -> std::io::Result<String>,
) -> Result<Credentials> {
    let username = prompt_line(input, output, "Username: ")?;
    let password = read_password("Password: ")?;
    Ok(Credentials {
        username,
        password: password.trim_end_matches(['\r', '\n']).to_owned(),
    })
}

/// Prompt on the terminal; the password is read with echo disabled.
///
/// # Errors
///
/// Same as [`read_credentials_with`].
pub fn prompt_credentials() -> Result<Credentials> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stderr();
    read_credentials_with(&mut input, &mut output, |prompt| {
        rpassword::prompt_password(prompt)
    })
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn prompt_line(input: &mut impl BufRead, output: &mut impl Write, prompt: &str) -> Result<String> {
    output.write_all(prompt.as_bytes())?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(AppError::Config("input ended before credentials were entered".into()));
    }
    Ok(line.trim().to_owned())
}

fn home_config_path() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Look up one credential in the OS keychain.
async fn load_keyring_credential(key: &str) -> Result<Option<String>> {
    let entry_key = key.to_owned();

    // keyring is synchronous I/O.
    let result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &entry_key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match result {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        Ok(_) => {
            warn!(key, "keychain entry is empty");
            Ok(None)
        }
        Err(keyring::Error::NoEntry) => {
            debug!(key, "no keychain entry");
            Ok(None)
        }
        Err(err) => {
            warn!(key, ?err, "keychain lookup failed");
            Ok(None)
        }
    }
}
