//! reader-export command-line interface
//!
//! Loads `config.ini`, applies command-line overrides, asks for whatever the
//! configuration leaves open and runs the export for one account.

use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use dialoguer::{Confirm, Input, Password, Select};
use reader_export::config::GeneralConfig;
use reader_export::error::{AuthError, ToExitCode};
use reader_export::{
    AccountExporter, Config, Credentials, DirNaming, Error, FinishedAction, PartialAction,
    ResumePolicy, Result, RunOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reader-export")]
#[command(about = "Download every item of every Google Reader subscription, resumably", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (`config.ini`, or a `.json` config tree)
    #[arg(short, long, default_value = "config.ini")]
    config: PathBuf,

    /// Root directory of the export tree
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Account email (prompted for when neither given here nor configured)
    #[arg(short, long)]
    user: Option<String>,

    /// Seconds to wait between requests
    #[arg(long)]
    wait_time: Option<f64>,

    /// What to do when the account already finished downloading
    #[arg(long, value_enum)]
    on_finished: Option<FinishedArg>,

    /// What to do when a partial download is found
    #[arg(long, value_enum)]
    on_partial: Option<PartialArg>,

    /// How feed directories are named
    #[arg(long, value_enum)]
    dir_naming: Option<DirNamingArg>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum FinishedArg {
    Restart,
    Stop,
}

#[derive(Clone, Copy, ValueEnum)]
enum PartialArg {
    Continue,
    StartOver,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirNamingArg {
    Id,
    Title,
}

impl Cli {
    /// Command-line values win over the configuration file
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(dir) = &self.data_dir {
            config.general.data_dir = dir.clone();
        }
        if let Some(user) = &self.user {
            config.account.user = Some(user.clone());
        }
        if let Some(secs) = self.wait_time {
            if secs < 0.0 {
                return Err(Error::config(
                    "wait-time",
                    format!("'{secs}' is not a valid duration"),
                ));
            }
            config.general.wait_time = Duration::try_from_secs_f64(secs).map_err(|_| {
                Error::config("wait-time", format!("'{secs}' is not a valid duration"))
            })?;
        }
        if let Some(action) = self.on_finished {
            config.general.overwrite_on_success = Some(match action {
                FinishedArg::Restart => FinishedAction::Restart,
                FinishedArg::Stop => FinishedAction::Stop,
            });
        }
        if let Some(action) = self.on_partial {
            config.general.overwrite_on_partial = Some(match action {
                PartialArg::Continue => PartialAction::Continue,
                PartialArg::StartOver => PartialAction::StartOver,
            });
        }
        if let Some(naming) = self.dir_naming {
            config.general.dir_naming = match naming {
                DirNamingArg::Id => DirNaming::Id,
                DirNamingArg::Title => DirNaming::Title,
            };
        }
        Ok(())
    }
}

/// Uses configured answers and asks on the terminal for the rest
struct PromptPolicy {
    on_finished: Option<FinishedAction>,
    on_partial: Option<PartialAction>,
}

impl PromptPolicy {
    fn from_config(general: &GeneralConfig) -> Self {
        Self {
            on_finished: general.overwrite_on_success,
            on_partial: general.overwrite_on_partial,
        }
    }
}

#[async_trait]
impl ResumePolicy for PromptPolicy {
    async fn on_finished(&self, account: &str) -> Result<FinishedAction> {
        if let Some(action) = self.on_finished {
            return Ok(action);
        }

        let prompt =
            format!("{account}'s data has already finished downloading. Start over again?");
        let restart = prompt_blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await?;

        Ok(if restart {
            FinishedAction::Restart
        } else {
            FinishedAction::Stop
        })
    }

    async fn on_partial(&self, account: &str) -> Result<PartialAction> {
        if let Some(action) = self.on_partial {
            return Ok(action);
        }

        let prompt = format!("{account}'s data was partially downloaded");
        let choice = prompt_blocking(move || {
            Select::new()
                .with_prompt(prompt)
                .items(&["Continue", "Start over"])
                .default(0)
                .interact()
        })
        .await?;

        Ok(if choice == 0 {
            PartialAction::Continue
        } else {
            PartialAction::StartOver
        })
    }
}

/// Run a terminal prompt off the async runtime
async fn prompt_blocking<T, F>(prompt: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(prompt)
        .await
        .map_err(|e| Error::Other(format!("prompt task failed: {e}")))?
        .map_err(|e| Error::Other(format!("terminal prompt failed: {e}")))
}

/// Credentials from the configuration, prompting for missing parts
async fn credentials(config: &Config) -> Result<Credentials> {
    let email = match &config.account.user {
        Some(user) => user.clone(),
        None => {
            prompt_blocking(|| {
                Input::<String>::new()
                    .with_prompt("Google Reader username")
                    .interact_text()
            })
            .await
            .map_err(|e| AuthError::Prompt(e.to_string()))?
        }
    };

    let password = match &config.account.password {
        Some(password) => password.clone(),
        None => {
            info!("Accounts with 2-step verification need an application-specific password");
            prompt_blocking(|| {
                Password::new()
                    .with_prompt("Password (will not display while typing)")
                    .interact()
            })
            .await
            .map_err(|e| AuthError::Prompt(e.to_string()))?
        }
    };

    Ok(Credentials::new(email.trim(), password))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let mut config = Config::load(&cli.config)?;
    cli.apply(&mut config)?;
    config.validate()?;

    let credentials = credentials(&config).await?;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(reader_export::cancel_on_signal(cancel.clone()));

    let policy = PromptPolicy::from_config(&config.general);
    let mut exporter = AccountExporter::new(config, cancel);
    let outcome = exporter.run(credentials, &policy).await;

    watcher.abort();
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("Start");

    match run(cli).await {
        Ok(outcome) => {
            info!(?outcome, "Done");
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            error!(code = e.error_code(), error = %e, "Export failed");
            ExitCode::from(e.exit_code())
        }
    }
}
