//! Subscription enumeration and the per-account list cache

use crate::config::Config;
use crate::error::{Error, Result, StateError};
use crate::retry::sleep_unless_cancelled;
use crate::transport::{ApiRequest, ReaderClient};
use crate::types::{Subscription, SubscriptionList};
use crate::utils::{read_gz, write_gz_atomic};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// File name of the cached subscription list inside an account directory
pub const SUBSCRIPTIONS_CACHE_FILE: &str = "subscriptions.json.gz";

/// Fetches the subscription list of the logged-in account
#[derive(Debug, Clone)]
pub struct SubscriptionEnumerator {
    list_path: String,
    list_attempts: u32,
    network_attempts: u32,
    wait_time: Duration,
    cancel: CancellationToken,
}

impl SubscriptionEnumerator {
    /// Create an enumerator from the exporter configuration
    pub fn new(config: &Config, cancel: CancellationToken) -> Self {
        Self {
            list_path: config.endpoints.subscription_list_path.clone(),
            list_attempts: config.retry.list_attempts,
            network_attempts: config.retry.network_attempts,
            wait_time: config.general.wait_time,
            cancel,
        }
    }

    /// Fetch the list from the service and cache it at `cache_path`
    ///
    /// A response only counts when it is a 200 whose body parses as a list with a
    /// `subscriptions` collection. The raw body is cached before the list is returned.
    /// Failure after every attempt is fatal.
    pub async fn fetch(
        &self,
        client: &mut ReaderClient,
        cache_path: &Path,
    ) -> Result<Vec<Subscription>> {
        info!("Retrieving subscription list");
        let request = ApiRequest::get(self.list_path.clone()).attempts(self.network_attempts);
        let mut last_status = 0;

        for attempt in 1..=self.list_attempts {
            let response = client.request(&request).await?;
            last_status = response.status;

            if response.is_success() {
                match serde_json::from_slice::<SubscriptionList>(&response.body) {
                    Ok(list) => {
                        write_gz_atomic(cache_path, &response.body).await?;
                        info!(
                            count = list.subscriptions.len(),
                            "Retrieved subscription list"
                        );
                        return Ok(list.subscriptions);
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "Malformed subscription list");
                    }
                }
            } else {
                warn!(attempt, status = response.status, "Subscription list request failed");
                debug!(body = %response.text(), "Subscription list error body");
            }

            sleep_unless_cancelled(self.wait_time, &self.cancel).await?;
        }

        Err(Error::Enumeration(format!(
            "no valid subscription list after {} attempts (last status {})",
            self.list_attempts, last_status
        )))
    }

    /// Load the list cached by an earlier run, without any network call
    ///
    /// A missing or unparsable cache cannot be resumed from and is reported as
    /// [`StateError::CorruptSubscriptionCache`].
    pub async fn load_cached(&self, cache_path: &Path) -> Result<Vec<Subscription>> {
        let corrupt = |reason: String| StateError::CorruptSubscriptionCache {
            path: cache_path.to_path_buf(),
            reason,
        };

        let raw = read_gz(cache_path)
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        let list: SubscriptionList =
            serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;

        debug!(
            count = list.subscriptions.len(),
            path = %cache_path.display(),
            "Loaded cached subscription list"
        );
        Ok(list.subscriptions)
    }
}
