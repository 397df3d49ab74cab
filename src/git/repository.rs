//! Participation repository driven through the `git` CLI.
//!
//! The repository is cloned (single branch) into a fresh temporary
//! directory below the work directory; the directory is removed when the
//! [`GitRepository`] is dropped. Credentials travel inside the clone URL
//! and are scrubbed from any error text before it is surfaced.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CommitProducer, GitConfig, GitCredentials};
use crate::{AppError, Result};

/// Prefix of the temporary clone directories.
const CLONE_PREFIX: &str = "artemisbot-";

/// Message of every retrigger commit.
const COMMIT_MESSAGE: &str = "retrigger";

/// A local clone used to push retrigger commits.
#[derive(Debug)]
pub struct GitRepository {
    dir: TempDir,
    config: GitConfig,
    secrets: Vec<String>,
    push_lock: Mutex<()>,
}

impl GitRepository {
    /// Clone `config.url` into a new temporary directory under `workdir`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Io`]: the work directory cannot be created.
    /// - [`AppError::Commit`]: `git clone` failed.
    pub async fn clone_into(
        config: GitConfig,
        credentials: &GitCredentials,
        workdir: &Path,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(workdir).await?;
        let dir = tempfile::Builder::new()
            .prefix(CLONE_PREFIX)
            .tempdir_in(workdir)?;

        let url = authenticated_url(&config.url, credentials);
        let branch = short_branch(&config.branch).to_owned();
        let secrets = vec![url.clone(), credentials.password.clone()];

        let target = dir.path().to_string_lossy().to_string();
        run_git(
            None,
            &[
                "clone",
                "--quiet",
                "--single-branch",
                "--branch",
                &branch,
                &url,
                &target,
            ],
            &[],
            &secrets,
        )
        .await?;

        info!(path = %dir.path().display(), branch, "repository cloned");
        Ok(Self {
            dir,
            config,
            secrets,
            push_lock: Mutex::new(()),
        })
    }

    async fn commit_and_push(&self) -> Result<String> {
        let _guard = self.push_lock.lock().await;
        let dir = Some(self.dir.path());
        let identity = [
            ("GIT_AUTHOR_NAME", self.config.name.as_str()),
            ("GIT_AUTHOR_EMAIL", self.config.email.as_str()),
            ("GIT_COMMITTER_NAME", self.config.name.as_str()),
            ("GIT_COMMITTER_EMAIL", self.config.email.as_str()),
        ];

        run_git(
            dir,
            &["commit", "--allow-empty", "--no-verify", "--quiet", "-m", COMMIT_MESSAGE],
            &identity,
            &self.secrets,
        )
        .await?;
        let hash = run_git(dir, &["rev-parse", "HEAD"], &[], &self.secrets).await?;
        run_git(
            dir,
            &["push", "--atomic", "--quiet", "origin", "HEAD"],
            &[],
            &self.secrets,
        )
        .await?;

        debug!(hash, "empty commit pushed");
        Ok(hash)
    }
}

impl CommitProducer for GitRepository {
    fn push_empty_commit(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(self.commit_and_push())
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Run `git` with `args` and return trimmed stdout.
async fn run_git(
    dir: Option<&Path>,
    args: &[&str],
    envs: &[(&str, &str)],
    secrets: &[String],
) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let subcommand = args.first().copied().unwrap_or_default();
    let output = cmd
        .output()
        .await
        .map_err(|e| AppError::Commit(format!("failed to run git {subcommand}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Commit(redact(
            &format!("git {subcommand} failed ({}): {}", output.status, stderr.trim()),
            secrets,
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

/// Embed basic-auth credentials into HTTP(S) clone URLs; other URLs pass through.
fn authenticated_url(url: &str, credentials: &GitCredentials) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_owned();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return url.to_owned();
    }
    if parsed.set_username(&credentials.username).is_err()
        || parsed.set_password(Some(&credentials.password)).is_err()
    {
        return url.to_owned();
    }
    parsed.into()
}

fn short_branch(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

fn redact(text: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_owned(), |acc, secret| acc.replace(secret.as_str(), "<redacted>"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
