//! # reader-export
//!
//! Resumable bulk export of a Google Reader account: every subscription, every page.
//!
//! ## Design
//!
//! - **Resumable** - progress is checkpointed after every stored page, at account and
//!   subscription level, so an interrupted export continues where it stopped
//! - **Polite** - strictly sequential requests, paced by a configurable wait time, with
//!   a long cooldown whenever the service signals rate limiting
//! - **Library-first** - the binary is a thin shell around [`AccountExporter`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use reader_export::{AccountExporter, Config, Credentials, FixedPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_ini_file("config.ini".as_ref())?;
//!     config.validate()?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(reader_export::cancel_on_signal(cancel.clone()));
//!
//!     let policy = FixedPolicy::from_config(&config.general);
//!     let mut exporter = AccountExporter::new(config, cancel);
//!     let outcome = exporter
//!         .run(Credentials::new("me@example.com", "secret"), &policy)
//!         .await?;
//!
//!     std::process::exit(outcome.exit_code().into());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Durable progress records
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Account export orchestration
pub mod exporter;
/// Retry policies for transient failures and rate limiting
pub mod retry;
/// Subscription list retrieval and caching
pub mod subscriptions;
/// HTTP client for the Reader API
pub mod transport;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use checkpoint::{AccountCheckpoint, CheckpointStore, SubscriptionCheckpoint};
pub use config::{Config, DirNaming};
pub use error::{AuthError, Error, Result, StateError, ToExitCode};
pub use exporter::{AccountExporter, ExportSummary, FixedPolicy, ResumePolicy};
pub use transport::{ApiRequest, ReaderClient, Response};
pub use types::{
    Credentials, FinishedAction, PartialAction, RunOutcome, Subscription, SubscriptionOutcome,
};

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Meant to be spawned next to the export; the export notices the cancellation at its
/// next request or wait and stops with every checkpoint intact.
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => token.cancel(),
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
