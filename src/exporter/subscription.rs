//! Paginated download of a single subscription

use crate::checkpoint::{CHECKPOINT_FILE, CheckpointStore, SubscriptionCheckpoint};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry::sleep_unless_cancelled;
use crate::transport::{ApiRequest, ReaderClient};
use crate::types::{Subscription, SubscriptionOutcome};
use crate::utils::{escape_feed_id, extract_tag, write_gz_atomic};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Tag carrying the continuation token inside a feed page
pub const CONTINUATION_TAG: &str = "gr:continuation";

/// Where a subscription download begins
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartFrom {
    /// First page, ignoring any checkpoint on disk
    Scratch,
    /// Wherever the subscription checkpoint says
    Checkpoint,
}

/// Downloads every page of one subscription, checkpointing after each page
#[derive(Debug, Clone)]
pub struct SubscriptionDownloader {
    feed_path: String,
    page_size: u32,
    page_attempts: u32,
    wait_time: Duration,
    store: CheckpointStore,
    cancel: CancellationToken,
}

impl SubscriptionDownloader {
    /// Create a downloader from the exporter configuration
    pub fn new(config: &Config, store: CheckpointStore, cancel: CancellationToken) -> Self {
        Self {
            feed_path: config.endpoints.feed_path.clone(),
            page_size: config.request.page_size,
            page_attempts: config.retry.page_attempts,
            wait_time: config.general.wait_time,
            store,
            cancel,
        }
    }

    /// Download `subscription` into `dir`
    ///
    /// The subscription checkpoint in `dir` is rewritten after every stored page. A page
    /// that cannot be fetched abandons the subscription and leaves the checkpoint at the
    /// last stored page, so a later run picks up from there.
    pub async fn download(
        &self,
        client: &mut ReaderClient,
        subscription: &Subscription,
        dir: &Path,
        start: StartFrom,
    ) -> Result<SubscriptionOutcome> {
        let checkpoint_path = dir.join(CHECKPOINT_FILE);

        let (mut index, mut token) = match start {
            StartFrom::Scratch => (0, String::new()),
            StartFrom::Checkpoint => match self.store.read_subscription(&checkpoint_path).await {
                Some(checkpoint) if checkpoint.finished => {
                    info!(id = %subscription.id, "Already downloaded, skipping");
                    return Ok(SubscriptionOutcome::AlreadyFinished);
                }
                Some(checkpoint) if !checkpoint.continuation.is_empty() => {
                    info!(
                        id = %subscription.id,
                        next_page = checkpoint.next_index,
                        "Resuming subscription"
                    );
                    (checkpoint.next_index, checkpoint.continuation)
                }
                _ => {
                    info!(id = %subscription.id, "No usable checkpoint, starting from the first page");
                    (0, String::new())
                }
            },
        };

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let url = self.page_request_path(&subscription.id, &token);
            info!(id = %subscription.id, page = index, "Downloading page");

            let response = client
                .request(&ApiRequest::get(url).attempts(self.page_attempts))
                .await?;

            if !response.is_success() {
                error!(
                    id = %subscription.id,
                    page = index,
                    status = response.status,
                    "Error downloading page, giving up this subscription"
                );
                debug!(body = %response.text(), "Failed page body");
                sleep_unless_cancelled(self.wait_time, &self.cancel).await?;
                return Ok(SubscriptionOutcome::Abandoned { pages: index });
            }

            write_gz_atomic(&page_file(dir, index), &response.body).await?;
            index += 1;

            let next = extract_tag(&response.text(), CONTINUATION_TAG)
                .unwrap_or_default()
                .to_string();
            let checkpoint = if next.is_empty() {
                SubscriptionCheckpoint::finished(index)
            } else {
                SubscriptionCheckpoint::in_progress(index, next.clone())
            };
            self.store
                .write_subscription(&checkpoint_path, &checkpoint)
                .await?;

            sleep_unless_cancelled(self.wait_time, &self.cancel).await?;

            if checkpoint.finished {
                info!(
                    id = %subscription.id,
                    title = %subscription.title,
                    pages = index,
                    "Finished subscription"
                );
                return Ok(SubscriptionOutcome::Finished { pages: index });
            }
            token = next;
        }
    }

    /// Request path of a feed page; `token` is empty for the first page
    pub fn page_request_path(&self, id: &str, token: &str) -> String {
        let mut path = format!(
            "{}{}?n={}",
            self.feed_path,
            escape_feed_id(id),
            self.page_size
        );
        if !token.is_empty() {
            path.push_str("&c=");
            path.push_str(token);
        }
        path
    }
}

/// File of page `index` inside a feed directory
pub fn page_file(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{index:05}.xml.gz"))
}
