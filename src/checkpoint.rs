//! Durable progress records for resumable exports
//!
//! A record is three lines, `<finished 0|1>`, `<index>`, `<token>`, the format older
//! export trees already use. The store only moves records to and from disk;
//! [`AccountCheckpoint`] and [`SubscriptionCheckpoint`] give them meaning.

use crate::error::Result;
use crate::utils::write_atomic;
use std::path::Path;
use tracing::debug;

/// File name of a progress record inside an account or feed directory
pub const CHECKPOINT_FILE: &str = "process.dat";

/// Raw fixed-shape progress record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressRecord {
    /// Whether the unit of work is complete
    pub finished: bool,
    /// Numeric position (next page index, or an unused placeholder)
    pub index: u64,
    /// Opaque string (continuation token or subscription id)
    pub token: String,
}

impl ProgressRecord {
    /// Render the on-disk representation
    pub fn encode(&self) -> String {
        format!("{}\n{}\n{}\n", u8::from(self.finished), self.index, self.token)
    }

    /// Parse the on-disk representation; `None` if the first two lines are not numbers
    pub fn decode(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let finished = lines.next()?.trim().parse::<i64>().ok()? != 0;
        let index = lines.next()?.trim().parse::<u64>().ok()?;
        let token = lines.next().unwrap_or("").trim_end().to_string();

        Some(Self {
            finished,
            index,
            token,
        })
    }
}

/// Reads and writes progress records
///
/// Writes replace the record atomically, so a crash leaves either the previous or the
/// new record on disk. Reads never fail: a missing or malformed record is absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckpointStore;

impl CheckpointStore {
    /// Create a store
    pub fn new() -> Self {
        Self
    }

    /// Read the record at `path`
    pub async fn read(&self, path: &Path) -> Option<ProgressRecord> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No readable checkpoint");
                return None;
            }
        };

        let record = ProgressRecord::decode(&text);
        if record.is_none() {
            debug!(path = %path.display(), "Ignoring malformed checkpoint");
        }
        record
    }

    /// Replace the record at `path`
    pub async fn write(&self, path: &Path, record: &ProgressRecord) -> Result<()> {
        write_atomic(path, record.encode().as_bytes()).await?;
        Ok(())
    }

    /// Read an account-level checkpoint
    pub async fn read_account(&self, path: &Path) -> Option<AccountCheckpoint> {
        self.read(path).await.map(AccountCheckpoint::from)
    }

    /// Write an account-level checkpoint
    pub async fn write_account(&self, path: &Path, checkpoint: &AccountCheckpoint) -> Result<()> {
        self.write(path, &ProgressRecord::from(checkpoint)).await
    }

    /// Read a subscription-level checkpoint
    pub async fn read_subscription(&self, path: &Path) -> Option<SubscriptionCheckpoint> {
        self.read(path).await.map(SubscriptionCheckpoint::from)
    }

    /// Write a subscription-level checkpoint
    pub async fn write_subscription(
        &self,
        path: &Path,
        checkpoint: &SubscriptionCheckpoint,
    ) -> Result<()> {
        self.write(path, &ProgressRecord::from(checkpoint)).await
    }
}

/// Account-level progress: which subscription is in flight, or whether all are done
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountCheckpoint {
    /// All subscriptions were processed
    pub finished: bool,
    /// Id of the subscription being downloaded; empty when finished
    pub current_subscription: String,
}

impl AccountCheckpoint {
    /// Mark `subscription_id` as the subscription in progress
    pub fn in_progress(subscription_id: impl Into<String>) -> Self {
        Self {
            finished: false,
            current_subscription: subscription_id.into(),
        }
    }

    /// Mark the account finished
    pub fn finished() -> Self {
        Self {
            finished: true,
            current_subscription: String::new(),
        }
    }
}

impl From<ProgressRecord> for AccountCheckpoint {
    fn from(record: ProgressRecord) -> Self {
        if record.finished {
            Self::finished()
        } else {
            Self::in_progress(record.token)
        }
    }
}

impl From<&AccountCheckpoint> for ProgressRecord {
    fn from(checkpoint: &AccountCheckpoint) -> Self {
        Self {
            finished: checkpoint.finished,
            // Unused placeholder kept for format compatibility
            index: 0,
            token: checkpoint.current_subscription.clone(),
        }
    }
}

/// Subscription-level progress: the resumption anchor for one feed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionCheckpoint {
    /// The last page has been stored
    pub finished: bool,
    /// Number of pages stored so far, and the sequence number of the next page
    pub next_index: u64,
    /// Continuation token for the next page; empty when finished
    pub continuation: String,
}

impl SubscriptionCheckpoint {
    /// Pages up to `next_index` are stored and `continuation` fetches the next one
    pub fn in_progress(next_index: u64, continuation: impl Into<String>) -> Self {
        Self {
            finished: false,
            next_index,
            continuation: continuation.into(),
        }
    }

    /// All `pages` pages are stored
    pub fn finished(pages: u64) -> Self {
        Self {
            finished: true,
            next_index: pages,
            continuation: String::new(),
        }
    }
}

impl From<ProgressRecord> for SubscriptionCheckpoint {
    fn from(record: ProgressRecord) -> Self {
        if record.finished {
            Self::finished(record.index)
        } else {
            Self::in_progress(record.index, record.token)
        }
    }
}

impl From<&SubscriptionCheckpoint> for ProgressRecord {
    fn from(checkpoint: &SubscriptionCheckpoint) -> Self {
        Self {
            finished: checkpoint.finished,
            index: checkpoint.next_index,
            token: checkpoint.continuation.clone(),
        }
    }
}
