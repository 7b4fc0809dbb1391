//! Error types for reader-export
//!
//! This module provides error handling for the exporter, including:
//! - Domain-specific error types (authentication, resumption state)
//! - Process exit code mapping for the command-line front end
//! - Machine-readable error codes for the final log line

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reader-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for reader-export
///
/// Transient transport failures never reach this type's callers as errors: the
/// transport absorbs them and reports a failed status instead. Everything that does
/// surface here is either fatal to the run or an operator interruption.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "datadir")
        key: Option<String>,
    },

    /// Authentication against the login endpoint failed
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Persisted resumption state cannot be used
    #[error("resumption state error: {0}")]
    State(#[from] StateError),

    /// The subscription list could not be retrieved
    #[error("subscription list error: {0}")]
    Enumeration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operator interrupted the run
    #[error("interrupted")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The login endpoint rejected the credentials
    #[error("login rejected with HTTP status {status}, check network, email and password")]
    Rejected {
        /// Status returned by the login endpoint (0 when no response was obtained)
        status: u16,
    },

    /// The login response did not carry an auth token
    #[error("no auth token in login response, verify email and password")]
    TokenMissing,

    /// Reading credentials from the terminal failed
    #[error("failed to read credentials: {0}")]
    Prompt(String),
}

/// Errors in persisted resumption state
#[derive(Debug, Error)]
pub enum StateError {
    /// The cached subscription list is missing or does not parse
    #[error(
        "invalid unfinished download data at {path}: {reason}; delete the downloaded data and try again"
    )]
    CorruptSubscriptionCache {
        /// Path of the cached list
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// The account directory cannot hold export data
    #[error("account directory {path} is unusable: {reason}")]
    UnusableAccountDir {
        /// The account directory
        path: PathBuf,
        /// The reason it cannot be used
        reason: String,
    },
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Exit code used when the run was interrupted and can be resumed
pub const EXIT_INTERRUPTED: u8 = 130;

/// Convert errors to process exit codes
///
/// Every error that reaches the top of a run is fatal; interruption is reported
/// separately so an operator can tell "resume me" apart from "fix me".
pub trait ToExitCode {
    /// Get the process exit code for this error
    fn exit_code(&self) -> u8;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> u8 {
        match self {
            Error::Cancelled => EXIT_INTERRUPTED,
            _ => 1,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Auth(e) => match e {
                AuthError::Rejected { .. } => "login_rejected",
                AuthError::TokenMissing => "auth_token_missing",
                AuthError::Prompt(_) => "credential_prompt_failed",
            },
            Error::State(e) => match e {
                StateError::CorruptSubscriptionCache { .. } => "corrupt_subscription_cache",
                StateError::UnusableAccountDir { .. } => "unusable_account_dir",
            },
            Error::Enumeration(_) => "subscription_list_failed",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Cancelled => "interrupted",
            Error::Other(_) => "internal_error",
        }
    }
}
