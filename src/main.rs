#![forbid(unsafe_code)]

//! `artemis-bot`: retrigger Artemis programming exercise builds until a
//! target score is reached.
//!
//! Loads configuration, resolves credentials, then hands control to the
//! supervisor until the target is met, a fatal error occurs, or the process
//! is interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use artemis_bot::artemis::ArtemisBackend;
use artemis_bot::config::{self, BotConfig, ConfigOverrides};
use artemis_bot::orchestrator::{Supervisor, SupervisorOutcome, SupervisorReport};
use artemis_bot::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "artemis-bot",
    about = "Artemis programming exercise automation",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default is $HOME/.artemisbot.toml).
    #[arg(long, global = true, env = "ARTEMISBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for temporary repository clones.
    #[arg(short = 'd', long, global = true, env = "ARTEMISBOT_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Enter credentials interactively.
    #[arg(short, long, global = true, env = "ARTEMISBOT_INTERACTIVE")]
    interactive: bool,

    /// Enable debug logging (ignored when `RUST_LOG` is set).
    #[arg(short, long, global = true, env = "ARTEMISBOT_VERBOSE")]
    verbose: bool,

    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Artemis login name.
    #[arg(long, global = true, env = "ARTEMISBOT_USERNAME")]
    username: Option<String>,

    /// Artemis password.
    #[arg(long, global = true, env = "ARTEMISBOT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Trigger the build until the desired percentage is reached.
    Retrigger(RetriggerArgs),
}

#[derive(Debug, Args)]
struct RetriggerArgs {
    /// URL of the exercise, e.g. `https://host/courses/1/exercises/2`.
    #[arg(short = 't', long, env = "ARTEMISBOT_ARTEMIS_URL")]
    artemis_url: Option<String>,

    /// Percentage of points to reach.
    #[arg(short, long, env = "ARTEMISBOT_PERCENTAGE", allow_negative_numbers = true)]
    percentage: Option<i64>,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format, args.verbose) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "artemis-bot stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let Commands::Retrigger(retrigger) = args.command;
    info!("starting artemis-bot");

    // ── Load configuration ──────────────────────────────
    let mut bot_config = BotConfig::discover(args.config.as_deref())?;
    bot_config.apply_overrides(ConfigOverrides {
        username: args.username,
        password: args.password,
        exercise_url: retrigger.artemis_url,
        desired_percentage: retrigger.percentage,
        workdir: args.workdir,
    });

    if args.interactive {
        let credentials = tokio::task::spawn_blocking(config::prompt_credentials)
            .await
            .map_err(|err| AppError::Config(format!("credential prompt panicked: {err}")))??;
        bot_config.set_credentials(credentials);
    } else {
        bot_config.load_credentials().await?;
    }

    let settings = bot_config.validate()?;
    info!(
        course_id = %settings.target.course_id,
        exercise_id = %settings.target.exercise_id,
        desired = settings.desired_percentage,
        workdir = %settings.workdir.display(),
        "configuration loaded"
    );

    // ── Run the supervisor ──────────────────────────────
    let supervisor = Supervisor::new(ArtemisBackend::new(settings.clone()), settings.supervisor());
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let report = supervisor.run(cancel).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SupervisorReport) {
    match report.outcome {
        SupervisorOutcome::Reached => info!(
            percentage = report.final_percentage,
            attempts = report.attempts,
            "desired percentage reached"
        ),
        SupervisorOutcome::AlreadySatisfied => info!(
            percentage = report.final_percentage,
            "nothing to do, desired percentage already reached"
        ),
        SupervisorOutcome::Interrupted => warn!(
            percentage = report.final_percentage,
            attempts = report.attempts,
            "interrupted before reaching the desired percentage"
        ),
    }

    println!("final score: {}%", report.final_percentage);
    for hash in &report.commits {
        println!("  {hash}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
