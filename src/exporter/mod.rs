//! Account-level export orchestration
//!
//! An export runs in three phases:
//! 1. Log in and decide how to start from the account checkpoint (fresh, resume or stop)
//! 2. Obtain the subscription list, from the service or from the cache when resuming
//! 3. Download subscriptions in list order, recording the one in flight in the account
//!    checkpoint, and mark the account finished at the end
//!
//! Abandoning a subscription never stops the account. Interruption leaves every
//! checkpoint at its last written state and reports [`RunOutcome::Interrupted`].

pub mod layout;
pub mod policy;
pub mod subscription;

pub use layout::{AccountLayout, FeedDir, feed_dir_name};
pub use policy::{FixedPolicy, ResumePolicy};
pub use subscription::{StartFrom, SubscriptionDownloader};

use crate::checkpoint::{AccountCheckpoint, CheckpointStore};
use crate::config::Config;
use crate::error::{Error, Result, StateError};
use crate::subscriptions::SubscriptionEnumerator;
use crate::transport::ReaderClient;
use crate::types::{
    Credentials, FinishedAction, PartialAction, RunOutcome, Subscription, SubscriptionOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the account starts after consulting its checkpoint
#[derive(Clone, Debug, PartialEq, Eq)]
enum AccountStart {
    /// Enumerate subscriptions again and download all of them from scratch
    Fresh,
    /// Continue at the recorded subscription, using the cached list
    Resume { subscription_id: String },
    /// Leave the finished export alone
    Stop,
}

/// Per-run counters, for the final log line and for callers that want details
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Subscriptions downloaded to the end during this run
    pub finished: usize,
    /// Subscriptions whose checkpoint already said finished
    pub already_finished: usize,
    /// Subscriptions given up after a failed page
    pub abandoned: usize,
    /// Subscriptions before the resume point, not touched
    pub skipped: usize,
    /// Pages on disk for the subscriptions processed in this run
    pub pages: u64,
}

impl ExportSummary {
    fn record(&mut self, outcome: SubscriptionOutcome) {
        match outcome {
            SubscriptionOutcome::Finished { pages } => {
                self.finished += 1;
                self.pages += pages;
            }
            SubscriptionOutcome::AlreadyFinished => self.already_finished += 1,
            SubscriptionOutcome::Abandoned { pages } => {
                self.abandoned += 1;
                self.pages += pages;
            }
        }
    }
}

/// Exports every subscription of one account
#[derive(Debug)]
pub struct AccountExporter {
    config: Config,
    client: ReaderClient,
    store: CheckpointStore,
    enumerator: SubscriptionEnumerator,
    downloader: SubscriptionDownloader,
    cancel: CancellationToken,
    summary: ExportSummary,
}

impl AccountExporter {
    /// Create an exporter; `cancel` interrupts the run at the next wait or request
    pub fn new(config: Config, cancel: CancellationToken) -> Self {
        let store = CheckpointStore::new();
        Self {
            client: ReaderClient::new(&config, cancel.clone()),
            enumerator: SubscriptionEnumerator::new(&config, cancel.clone()),
            downloader: SubscriptionDownloader::new(&config, store, cancel.clone()),
            store,
            cancel,
            config,
            summary: ExportSummary::default(),
        }
    }

    /// Counters of the last run
    pub fn summary(&self) -> &ExportSummary {
        &self.summary
    }

    /// Run the export for the account identified by `credentials`
    ///
    /// Interruption is not an error: it yields [`RunOutcome::Interrupted`]. Errors are
    /// fatal conditions such as a rejected login or an unusable subscription cache.
    pub async fn run(
        &mut self,
        credentials: Credentials,
        policy: &dyn ResumePolicy,
    ) -> Result<RunOutcome> {
        self.summary = ExportSummary::default();

        match self.export(credentials, policy).await {
            Err(Error::Cancelled) => {
                info!("Interrupted. You may continue the unfinished download next time");
                Ok(RunOutcome::Interrupted)
            }
            other => other,
        }
    }

    async fn export(
        &mut self,
        credentials: Credentials,
        policy: &dyn ResumePolicy,
    ) -> Result<RunOutcome> {
        let account = credentials.email.clone();
        info!(user = %account, "Starting export");

        self.client.login(credentials).await?;

        let layout = AccountLayout::new(&self.config.general.data_dir, &account)?;
        layout.prepare().await?;

        let start = self.resolve_start(&layout, &account, policy).await?;
        let (subscriptions, mut resume_point) = match start {
            AccountStart::Stop => {
                info!(user = %account, "Already finished, nothing to do");
                return Ok(RunOutcome::Stopped);
            }
            AccountStart::Fresh => {
                let subscriptions = self
                    .enumerator
                    .fetch(&mut self.client, &layout.subscriptions_cache_path())
                    .await?;
                (subscriptions, None)
            }
            AccountStart::Resume { subscription_id } => {
                let subscriptions = self
                    .enumerator
                    .load_cached(&layout.subscriptions_cache_path())
                    .await?;
                ensure_listed(&layout, &subscriptions, &subscription_id)?;
                (subscriptions, Some(subscription_id))
            }
        };

        let checkpoint_path = layout.checkpoint_path();
        let total = subscriptions.len();

        for (position, subscription) in subscriptions.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let start_from = if let Some(id) = resume_point.as_deref() {
                if id != subscription.id {
                    debug!(id = %subscription.id, "Before the resume point, skipping");
                    self.summary.skipped += 1;
                    continue;
                }
                resume_point = None;
                StartFrom::Checkpoint
            } else {
                self.store
                    .write_account(
                        &checkpoint_path,
                        &AccountCheckpoint::in_progress(subscription.id.clone()),
                    )
                    .await?;
                StartFrom::Scratch
            };

            info!(
                position = position + 1,
                total,
                id = %subscription.id,
                title = %subscription.title,
                "Processing subscription"
            );

            let base = feed_dir_name(subscription, self.config.general.dir_naming);
            let dir = layout.claim_feed_dir(subscription, &base).await?;
            layout.mark_categories(subscription, &dir.name).await?;

            let outcome = self
                .downloader
                .download(&mut self.client, subscription, &dir.path, start_from)
                .await?;
            self.summary.record(outcome);
        }

        self.store
            .write_account(&checkpoint_path, &AccountCheckpoint::finished())
            .await?;

        info!(
            user = %account,
            finished = self.summary.finished,
            already_finished = self.summary.already_finished,
            abandoned = self.summary.abandoned,
            pages = self.summary.pages,
            "Finished downloading account"
        );
        Ok(RunOutcome::Finished)
    }

    async fn resolve_start(
        &self,
        layout: &AccountLayout,
        account: &str,
        policy: &dyn ResumePolicy,
    ) -> Result<AccountStart> {
        let Some(checkpoint) = self.store.read_account(&layout.checkpoint_path()).await else {
            return Ok(AccountStart::Fresh);
        };

        if checkpoint.finished {
            return Ok(match policy.on_finished(account).await? {
                FinishedAction::Restart => {
                    info!(user = %account, "Already finished, starting over");
                    AccountStart::Fresh
                }
                FinishedAction::Stop => AccountStart::Stop,
            });
        }

        if checkpoint.current_subscription.is_empty() {
            warn!(user = %account, "Account checkpoint names no subscription, starting fresh");
            return Ok(AccountStart::Fresh);
        }

        Ok(match policy.on_partial(account).await? {
            PartialAction::StartOver => {
                info!(user = %account, "Discarding partial download, starting over");
                AccountStart::Fresh
            }
            PartialAction::Continue => {
                info!(
                    user = %account,
                    id = %checkpoint.current_subscription,
                    "Continuing partial download"
                );
                AccountStart::Resume {
                    subscription_id: checkpoint.current_subscription,
                }
            }
        })
    }
}

/// A resume point missing from the cached list means the cache and the checkpoint
/// disagree; resuming would silently skip everything.
fn ensure_listed(layout: &AccountLayout, subscriptions: &[Subscription], id: &str) -> Result<()> {
    if subscriptions.iter().any(|s| s.id == id) {
        return Ok(());
    }
    Err(StateError::CorruptSubscriptionCache {
        path: layout.subscriptions_cache_path(),
        reason: format!("subscription '{id}' recorded as in progress is not in the list"),
    }
    .into())
}
