//! On-disk layout of one account's export tree
//!
//! ```text
//! <data_dir>/<user>/
//!     process.dat               account checkpoint
//!     subscriptions.json.gz     cached subscription list
//!     feed/<dir>/meta.json.gz   descriptor of the subscription stored in <dir>
//!     feed/<dir>/process.dat    subscription checkpoint
//!     feed/<dir>/00000.xml.gz   pages
//!     category/<label>/<dir>    zero-byte membership markers
//! ```

use crate::checkpoint::CHECKPOINT_FILE;
use crate::config::DirNaming;
use crate::error::{Result, StateError};
use crate::subscriptions::SUBSCRIPTIONS_CACHE_FILE;
use crate::types::Subscription;
use crate::utils::{encode_dir_name, read_gz, sanitize_dir_name, touch, write_gz_atomic};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the descriptor snapshot inside a feed directory
pub const DESCRIPTOR_FILE: &str = "meta.json.gz";

const FEED_DIR: &str = "feed";
const CATEGORY_DIR: &str = "category";

/// Paths of one account's export tree
#[derive(Clone, Debug)]
pub struct AccountLayout {
    root: PathBuf,
}

/// A feed directory owned by one subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedDir {
    /// Directory path
    pub path: PathBuf,
    /// Directory name, including any disambiguation suffix
    pub name: String,
}

impl AccountLayout {
    /// Layout for `user` under `data_dir`
    pub fn new(data_dir: &Path, user: &str) -> Result<Self> {
        let root = data_dir.join(user);
        let invalid = user.trim().is_empty()
            || user.contains(['/', '\\'])
            || user == "."
            || user == "..";
        if invalid {
            return Err(StateError::UnusableAccountDir {
                path: root,
                reason: format!("'{user}' is not a usable directory name"),
            }
            .into());
        }
        Ok(Self { root })
    }

    /// Create the account directory
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            StateError::UnusableAccountDir {
                path: self.root.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }

    /// Account directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Account checkpoint record
    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join(CHECKPOINT_FILE)
    }

    /// Cached subscription list
    pub fn subscriptions_cache_path(&self) -> PathBuf {
        self.root.join(SUBSCRIPTIONS_CACHE_FILE)
    }

    /// Parent of all feed directories
    pub fn feed_root(&self) -> PathBuf {
        self.root.join(FEED_DIR)
    }

    /// Parent of all category directories
    pub fn category_root(&self) -> PathBuf {
        self.root.join(CATEGORY_DIR)
    }

    /// Find or create the directory that stores `subscription`
    ///
    /// Candidates are `<base>`, `<base>_1`, `<base>_2`, ... A candidate holding the
    /// descriptor of another subscription is skipped. The first candidate holding our
    /// own descriptor, or none at all, is claimed; in the latter case our descriptor
    /// is written into it.
    pub async fn claim_feed_dir(&self, subscription: &Subscription, base: &str) -> Result<FeedDir> {
        let feed_root = self.feed_root();
        let mut suffix = 0u32;

        loop {
            let name = if suffix == 0 {
                base.to_string()
            } else {
                format!("{base}_{suffix}")
            };
            let path = feed_root.join(&name);
            tokio::fs::create_dir_all(&path).await?;

            match stored_descriptor_id(&path).await {
                Some(id) if id == subscription.id => {
                    return Ok(FeedDir { path, name });
                }
                Some(other) => {
                    debug!(dir = %name, owner = %other, "Directory belongs to another subscription");
                    suffix += 1;
                }
                None => {
                    let descriptor = serde_json::to_vec(subscription)?;
                    write_gz_atomic(&path.join(DESCRIPTOR_FILE), &descriptor).await?;
                    return Ok(FeedDir { path, name });
                }
            }
        }
    }

    /// Drop a zero-byte marker named `dir_name` into every category of `subscription`
    pub async fn mark_categories(&self, subscription: &Subscription, dir_name: &str) -> Result<()> {
        let category_root = self.category_root();

        for category in &subscription.categories {
            let label = sanitize_dir_name(&category.label);
            if label.trim().is_empty() {
                debug!(id = %subscription.id, "Skipping category without a label");
                continue;
            }
            let dir = category_root.join(label);
            tokio::fs::create_dir_all(&dir).await?;
            touch(&dir.join(dir_name)).await?;
        }
        Ok(())
    }
}

/// Base directory name for a subscription under the given naming scheme
pub fn feed_dir_name(subscription: &Subscription, naming: DirNaming) -> String {
    match naming {
        DirNaming::Id => encode_dir_name(&subscription.id),
        DirNaming::Title => {
            let title = sanitize_dir_name(subscription.title.trim());
            if title.is_empty() {
                encode_dir_name(&subscription.id)
            } else {
                title
            }
        }
    }
}

/// Id recorded in a directory's descriptor; `None` if absent or unreadable
async fn stored_descriptor_id(dir: &Path) -> Option<String> {
    let raw = read_gz(&dir.join(DESCRIPTOR_FILE)).await.ok()?;
    let value: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}
