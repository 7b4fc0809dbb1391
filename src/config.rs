//! Configuration types for reader-export

use crate::error::{Error, Result};
use crate::types::{FinishedAction, PartialAction, is_affirmative};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default server used when no alternate addresses are configured
pub const DEFAULT_SERVER: &str = "https://www.google.com";

/// Default user agent. The service only negotiates gzip for browser-like agents.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.1; rv:20.0) Gecko/20100101 Firefox/20.0";

/// HTTP request settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Alternate server base URLs; one is picked at random on every (re)connect
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Connect/read timeout for a single request (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Number of items requested per feed page (default: 2000)
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            page_size: default_page_size(),
        }
    }
}

/// Stored account credentials
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account email; prompted for when absent
    #[serde(default)]
    pub user: Option<String>,

    /// Account password; prompted for when absent
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How feed directories are named on disk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirNaming {
    /// Percent-encoded subscription id (default, collisions are practically impossible)
    #[default]
    Id,
    /// Sanitized subscription title (readable, collisions are disambiguated with suffixes)
    Title,
}

impl FromStr for DirNaming {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "id" => Ok(DirNaming::Id),
            "title" => Ok(DirNaming::Title),
            other => Err(Error::config(
                "dir_naming",
                format!("expected 'id' or 'title', got '{other}'"),
            )),
        }
    }
}

/// Export behaviour settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Root of the export tree; each account gets a subdirectory (default: "data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Pause between requests, also used as the transient retry delay (default: 1 second)
    #[serde(default = "default_wait_time", with = "duration_serde")]
    pub wait_time: Duration,

    /// What to do when the account already finished downloading (None = ask)
    #[serde(default)]
    pub overwrite_on_success: Option<FinishedAction>,

    /// What to do when a partial download is found (None = ask)
    #[serde(default)]
    pub overwrite_on_partial: Option<PartialAction>,

    /// Feed directory naming scheme
    #[serde(default)]
    pub dir_naming: DirNaming,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            wait_time: default_wait_time(),
            overwrite_on_success: None,
            overwrite_on_partial: None,
            dir_naming: DirNaming::default(),
        }
    }
}

/// Retry budgets and backoff settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts for ordinary API calls on network errors (default: 3)
    #[serde(default = "default_network_attempts")]
    pub network_attempts: u32,

    /// Attempts for the login call (default: 99)
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,

    /// Attempts to obtain a well-formed subscription list (default: 3)
    #[serde(default = "default_list_attempts")]
    pub list_attempts: u32,

    /// Attempts for a single feed page before the subscription is abandoned (default: 99999)
    #[serde(default = "default_page_attempts")]
    pub page_attempts: u32,

    /// Cooldown after the service answers 503 (default: 1 hour)
    #[serde(default = "default_rate_limit_cooldown", with = "duration_serde")]
    pub rate_limit_cooldown: Duration,

    /// Multiplier applied to the retry delay after each failed attempt (default: 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the retry delay (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to retry delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            network_attempts: default_network_attempts(),
            login_attempts: default_login_attempts(),
            list_attempts: default_list_attempts(),
            page_attempts: default_page_attempts(),
            rate_limit_cooldown: default_rate_limit_cooldown(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// API paths relative to the selected server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Login endpoint
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Subscription list endpoint
    #[serde(default = "default_subscription_list_path")]
    pub subscription_list_path: String,

    /// Prefix of the feed page endpoint; the escaped subscription id is appended
    #[serde(default = "default_feed_path")]
    pub feed_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            subscription_list_path: default_subscription_list_path(),
            feed_path: default_feed_path(),
        }
    }
}

/// Main configuration for the exporter
///
/// Fields are organized into logical sub-configs:
/// - [`request`](RequestConfig) - servers, user agent, timeouts, page size
/// - [`account`](AccountConfig) - stored credentials
/// - [`general`](GeneralConfig) - data directory, pacing, overwrite policies
/// - [`retry`](RetryConfig) - retry budgets and rate-limit cooldown
/// - [`endpoints`](EndpointConfig) - API paths
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP request settings
    #[serde(default)]
    pub request: RequestConfig,

    /// Stored credentials
    #[serde(default)]
    pub account: AccountConfig,

    /// Export behaviour
    #[serde(default)]
    pub general: GeneralConfig,

    /// Retry budgets
    #[serde(default)]
    pub retry: RetryConfig,

    /// API paths
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

impl Config {
    /// Load configuration from `path`
    ///
    /// Files ending in `.json` hold the serialized [`Config`] tree (durations in
    /// milliseconds, every field optional); anything else is read as `config.ini`.
    pub fn load(path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            return Self::from_ini_file(path);
        }

        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse configuration from the JSON form of the [`Config`] tree
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config {
            message: format!("failed to parse config: {}", e),
            key: None,
        })
    }

    /// Load configuration from an INI file in the `config.ini` layout
    ///
    /// A missing file is not an error: defaults are returned and the caller prompts
    /// for whatever it still needs.
    pub fn from_ini_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = ini::Ini::load_from_file(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse configuration from INI text
    pub fn from_ini_str(text: &str) -> Result<Self> {
        let ini = ini::Ini::load_from_str(text).map_err(|e| Error::Config {
            message: format!("failed to parse config: {}", e),
            key: None,
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &ini::Ini) -> Result<Self> {
        let mut config = Config::default();

        if let Some(section) = ini.section(Some("request")) {
            if let Some(list) = non_empty(section.get("customip")) {
                let servers: Vec<String> = list
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(normalize_server)
                    .collect();
                if !servers.is_empty() {
                    tracing::warn!(
                        count = servers.len(),
                        "Loaded custom server addresses, remove them if downloads fail"
                    );
                    config.request.servers = servers;
                }
            }
            if let Some(ua) = non_empty(
                section
                    .get("User-Agent")
                    .or_else(|| section.get("user-agent")),
            ) {
                config.request.user_agent = ua.to_string();
            }
            if let Some(v) = non_empty(section.get("timeout")) {
                config.request.timeout = parse_secs("timeout", v)?;
            }
            if let Some(v) = non_empty(section.get("page_size")) {
                config.request.page_size = parse_num("page_size", v)?;
            }
        }

        if let Some(section) = ini.section(Some("account")) {
            config.account.user = non_empty(section.get("user")).map(str::to_string);
            config.account.password = non_empty(section.get("pwd")).map(str::to_string);
        }

        if let Some(section) = ini.section(Some("general")) {
            if let Some(v) = non_empty(section.get("datadir")) {
                config.general.data_dir = PathBuf::from(v);
            }
            if let Some(v) = non_empty(section.get("waittime")) {
                config.general.wait_time = parse_secs("waittime", v)?;
            }
            if let Some(v) = non_empty(section.get("overwrite_on_success")) {
                config.general.overwrite_on_success = Some(FinishedAction::from_answer(v));
            }
            if let Some(v) = non_empty(section.get("overwrite_on_partial")) {
                let action = PartialAction::from_answer(v).ok_or_else(|| {
                    Error::config(
                        "overwrite_on_partial",
                        format!("expected 'continue' or 'start over', got '{v}'"),
                    )
                })?;
                config.general.overwrite_on_partial = Some(action);
            }
            if let Some(v) = non_empty(section.get("dir_naming")) {
                config.general.dir_naming = v.parse()?;
            }
        }

        if let Some(section) = ini.section(Some("retry")) {
            let retry = &mut config.retry;
            if let Some(v) = non_empty(section.get("network_attempts")) {
                retry.network_attempts = parse_num("network_attempts", v)?;
            }
            if let Some(v) = non_empty(section.get("login_attempts")) {
                retry.login_attempts = parse_num("login_attempts", v)?;
            }
            if let Some(v) = non_empty(section.get("list_attempts")) {
                retry.list_attempts = parse_num("list_attempts", v)?;
            }
            if let Some(v) = non_empty(section.get("page_attempts")) {
                retry.page_attempts = parse_num("page_attempts", v)?;
            }
            if let Some(v) = non_empty(section.get("rate_limit_cooldown")) {
                retry.rate_limit_cooldown = parse_secs("rate_limit_cooldown", v)?;
            }
            if let Some(v) = non_empty(section.get("backoff_multiplier")) {
                retry.backoff_multiplier = parse_num("backoff_multiplier", v)?;
            }
            if let Some(v) = non_empty(section.get("max_delay")) {
                retry.max_delay = parse_secs("max_delay", v)?;
            }
            if let Some(v) = non_empty(section.get("jitter")) {
                retry.jitter = is_affirmative(v);
            }
        }

        Ok(config)
    }

    /// Check the configuration for values the exporter cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.request.servers.is_empty() {
            return Err(Error::config("customip", "server list is empty"));
        }
        for server in &self.request.servers {
            let parsed = url::Url::parse(server).map_err(|e| {
                Error::config("customip", format!("invalid server address '{server}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::config(
                    "customip",
                    format!("server '{server}' must use http or https"),
                ));
            }
        }
        if self.request.page_size == 0 {
            return Err(Error::config("page_size", "must be greater than zero"));
        }
        if self.general.data_dir.as_os_str().is_empty() {
            return Err(Error::config("datadir", "must not be empty"));
        }

        let retry = &self.retry;
        for (key, value) in [
            ("network_attempts", retry.network_attempts),
            ("login_attempts", retry.login_attempts),
            ("list_attempts", retry.list_attempts),
            ("page_attempts", retry.page_attempts),
        ] {
            if value == 0 {
                return Err(Error::config(key, "must be at least 1"));
            }
        }
        if !(retry.backoff_multiplier.is_finite() && retry.backoff_multiplier >= 1.0) {
            return Err(Error::config("backoff_multiplier", "must be >= 1.0"));
        }

        Ok(())
    }
}

/// Turn a bare host or IP into a base URL; full URLs lose their trailing slash
pub fn normalize_server(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.contains("://") {
        server.to_string()
    } else {
        format!("https://{server}")
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(key, format!("'{value}' is not a valid number")))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: f64 = parse_num(key, value)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::config(key, format!("'{value}' is not a valid duration")));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::config(key, format!("'{value}' is too large for a duration")))
}

fn default_servers() -> Vec<String> {
    vec![DEFAULT_SERVER.to_string()]
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_page_size() -> u32 {
    2000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_wait_time() -> Duration {
    Duration::from_secs(1)
}

fn default_network_attempts() -> u32 {
    3
}

fn default_login_attempts() -> u32 {
    99
}

fn default_list_attempts() -> u32 {
    3
}

fn default_page_attempts() -> u32 {
    99999
}

fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_login_path() -> String {
    "/accounts/ClientLogin".to_string()
}

fn default_subscription_list_path() -> String {
    "/reader/api/0/subscription/list?output=json".to_string()
}

fn default_feed_path() -> String {
    "/reader/atom/".to_string()
}

// Duration serialization helper (milliseconds keep sub-second pacing representable)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
