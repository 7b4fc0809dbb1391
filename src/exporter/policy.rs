//! Decisions about existing export state

use crate::config::GeneralConfig;
use crate::error::Result;
use crate::types::{FinishedAction, PartialAction};
use async_trait::async_trait;

/// Decides what to do with an account that already has export state on disk
///
/// The exporter consults the policy at most once per run, before any network traffic
/// beyond the login.
#[async_trait]
pub trait ResumePolicy: Send + Sync {
    /// The account finished downloading in an earlier run
    async fn on_finished(&self, account: &str) -> Result<FinishedAction>;

    /// An earlier run stopped part way through the account
    async fn on_partial(&self, account: &str) -> Result<PartialAction>;
}

/// Policy with fixed answers, for unattended runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedPolicy {
    /// Answer for finished accounts
    pub on_finished: FinishedAction,
    /// Answer for partially downloaded accounts
    pub on_partial: PartialAction,
}

impl FixedPolicy {
    /// Create a policy with the given answers
    pub fn new(on_finished: FinishedAction, on_partial: PartialAction) -> Self {
        Self {
            on_finished,
            on_partial,
        }
    }

    /// Answers from the configuration; unset decisions keep existing work
    /// (stop a finished account, continue a partial one)
    pub fn from_config(general: &GeneralConfig) -> Self {
        Self::new(
            general
                .overwrite_on_success
                .unwrap_or(FinishedAction::Stop),
            general
                .overwrite_on_partial
                .unwrap_or(PartialAction::Continue),
        )
    }
}

impl Default for FixedPolicy {
    fn default() -> Self {
        Self::new(FinishedAction::Stop, PartialAction::Continue)
    }
}

#[async_trait]
impl ResumePolicy for FixedPolicy {
    async fn on_finished(&self, _account: &str) -> Result<FinishedAction> {
        Ok(self.on_finished)
    }

    async fn on_partial(&self, _account: &str) -> Result<PartialAction> {
        Ok(self.on_partial)
    }
}
