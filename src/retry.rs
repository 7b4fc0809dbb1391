//! Retry policies for transport failures
//!
//! Two policies with different exit conditions:
//!
//! - [`TransientRetry`] bounds the number of attempts for network-level failures
//!   (connection resets, timeouts, malformed responses). Exhaustion is not an error;
//!   the caller gets a failed status and decides what that means.
//! - [`RateLimitRetry`] handles the service answering 503. It never gives up: it cools
//!   down, asks for a fresh session and tries again, without touching the transient
//!   attempt budget.
//!
//! Both only wait through [`sleep_unless_cancelled`], so an operator interrupt ends any
//! wait immediately.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// HTTP status the service uses to signal that the client is being throttled
pub const RATE_LIMITED_STATUS: u16 = 503;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection reset) should return `true`.
/// Permanent failures (bad configuration, disk full, interruption) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Connection-level and framing errors; a builder error means bad input
            Error::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::InvalidData
            ),
            Error::Config { .. } => false,
            Error::Auth(_) => false,
            Error::State(_) => false,
            Error::Enumeration(_) => false,
            Error::Serialization(_) => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

/// Bounded retry policy for transient network failures
#[derive(Clone, Debug, PartialEq)]
pub struct TransientRetry {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after every failed attempt (1.0 = fixed pacing)
    pub backoff_multiplier: f64,
    /// Spread delays randomly between `delay` and `2 * delay`
    pub jitter: bool,
}

impl TransientRetry {
    /// Build a policy from the retry settings, pacing retries by `wait_time`
    pub fn from_config(config: &RetryConfig, wait_time: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: wait_time,
            max_delay: config.max_delay.max(wait_time),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Same pacing with a different attempt budget
    #[must_use]
    pub fn with_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self.clone()
        }
    }

    /// Start a fresh delay sequence
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            next: self.initial_delay,
        }
    }
}

/// Delay sequence for one retried operation
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a TransientRetry,
    next: Duration,
}

impl Backoff<'_> {
    /// Delay to wait before the next attempt; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;

        // Growth past what a Duration can hold saturates at the cap
        let grown = Duration::try_from_secs_f64(delay.as_secs_f64() * self.policy.backoff_multiplier)
            .unwrap_or(self.policy.max_delay);
        self.next = grown.min(self.policy.max_delay);

        if self.policy.jitter {
            add_jitter(delay)
        } else {
            delay
        }
    }
}

/// Unbounded retry policy for rate-limited (503) responses
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitRetry {
    /// How long to stay away from the service before trying again
    pub cooldown: Duration,
}

impl RateLimitRetry {
    /// Build the policy from the retry settings
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            cooldown: config.rate_limit_cooldown,
        }
    }

    /// Whether a response status triggers this policy
    pub fn applies_to(&self, status: u16) -> bool {
        status == RATE_LIMITED_STATUS
    }
}

/// Sleep for `duration`, returning [`Error::Cancelled`] as soon as `cancel` fires
pub async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the actual
/// delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}
