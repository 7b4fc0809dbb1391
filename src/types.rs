//! Core types shared across the exporter

use crate::error::EXIT_INTERRUPTED;
use serde::{Deserialize, Serialize};

/// Account credentials used for login and for re-authentication after rate limiting
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
}

impl Credentials {
    /// Create credentials from an email and a password
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A category (folder/tag) a subscription belongs to
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Human-readable label
    pub label: String,

    /// Remaining fields are kept so the descriptor round-trips unchanged
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Immutable snapshot of one subscription as returned by the list endpoint
///
/// Persisted once per feed directory (`meta.json.gz`) so a directory can be matched
/// back to the subscription that owns it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Stream id, e.g. `feed/http://example.com/rss`
    pub id: String,

    /// Feed title
    #[serde(default)]
    pub title: String,

    /// Categories the subscription is filed under
    #[serde(default)]
    pub categories: Vec<Category>,

    /// Remaining fields (sortid, htmlUrl, firstitemmsec, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Payload of the subscription list endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionList {
    /// Subscriptions in the order the service returned them
    pub subscriptions: Vec<Subscription>,
}

/// Decision when an account has already finished downloading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishedAction {
    /// Download everything again
    Restart,
    /// Leave the finished export alone
    Stop,
}

impl FinishedAction {
    /// Interpret a yes/no style answer; anything not affirmative means stop
    pub fn from_answer(answer: &str) -> Self {
        if is_affirmative(answer) {
            FinishedAction::Restart
        } else {
            FinishedAction::Stop
        }
    }
}

/// Decision when an account has a partially finished download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialAction {
    /// Resume from the recorded subscription and page
    Continue,
    /// Discard progress and enumerate subscriptions again
    StartOver,
}

impl PartialAction {
    /// Interpret an answer starting with `c` (continue) or `s` (start over)
    pub fn from_answer(answer: &str) -> Option<Self> {
        match answer.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('c') => Some(PartialAction::Continue),
            Some('s') => Some(PartialAction::StartOver),
            _ => None,
        }
    }
}

/// True for answers starting with `y`, `t` or `1` (yes/true/1, any case)
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().chars().next().map(|c| c.to_ascii_lowercase()),
        Some('y' | 't' | '1')
    )
}

/// Result of downloading one subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// All pages were downloaded during this run
    Finished {
        /// Total number of pages stored for the subscription
        pages: u64,
    },
    /// The checkpoint already marked the subscription finished; nothing was fetched
    AlreadyFinished,
    /// A page fetch failed definitively; a later run resumes from `pages`
    Abandoned {
        /// Number of pages safely stored before giving up
        pages: u64,
    },
}

/// Result of a whole account run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every subscription was processed and the account marked finished
    Finished,
    /// The account was already finished and the operator chose not to restart
    Stopped,
    /// The operator interrupted the run; checkpoints allow continuing later
    Interrupted,
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Finished | RunOutcome::Stopped => 0,
            RunOutcome::Interrupted => EXIT_INTERRUPTED,
        }
    }
}
