//! Transport client for the Reader API
//!
//! [`ReaderClient`] owns the HTTP connection, the session token and the credentials used
//! to renew it. Every call goes through two retry layers:
//!
//! 1. [`TransientRetry`]: network errors tear the connection down, wait `wait_time` and
//!    try again, up to the request's attempt budget. Exhaustion yields a
//!    [`Response`] with status 0 rather than an error.
//! 2. [`RateLimitRetry`]: a 503 waits out the cooldown, reconnects, renews the session
//!    once per run of consecutive 503s, and repeats the request without spending the
//!    attempt budget.

use crate::config::{Config, DEFAULT_SERVER, EndpointConfig, RequestConfig};
use crate::error::{AuthError, Error, Result};
use crate::retry::{IsRetryable, RateLimitRetry, TransientRetry, sleep_unless_cancelled};
use crate::types::Credentials;
use rand::seq::SliceRandom;
use std::borrow::Cow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Prefix of the line carrying the session token in a login response
const AUTH_LINE_PREFIX: &str = "Auth=";

/// Outcome of one API call after all transport-level retries
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// HTTP status; 0 when no response could be obtained
    pub status: u16,
    /// Response body, already decompressed
    pub body: Vec<u8>,
}

impl Response {
    /// The result reported when every attempt failed at the network level
    pub fn failed() -> Self {
        Self::default()
    }

    /// Whether the status is 200 OK
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// One API call: a path plus an optional form body
#[derive(Clone, Debug)]
pub struct ApiRequest {
    path: String,
    form: Option<Vec<(String, String)>>,
    max_attempts: Option<u32>,
    require_auth: bool,
}

impl ApiRequest {
    /// A bodyless GET of `path` (relative to the server, query included)
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            form: None,
            max_attempts: None,
            require_auth: true,
        }
    }

    /// A POST of `path` with a URL-encoded form body
    pub fn post_form<K, V>(path: impl Into<String>, form: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: path.into(),
            form: Some(
                form.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            max_attempts: None,
            require_auth: true,
        }
    }

    /// Attempt budget for transient network failures (default: `network_attempts`)
    #[must_use]
    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Send without the session token
    #[must_use]
    pub fn unauthenticated(mut self) -> Self {
        self.require_auth = false;
        self
    }

    /// Path relative to the server
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Authenticated client for the Reader API
pub struct ReaderClient {
    request_config: RequestConfig,
    endpoints: EndpointConfig,
    transient: TransientRetry,
    login_attempts: u32,
    rate_limit: RateLimitRetry,
    cancel: CancellationToken,

    http: Option<reqwest::Client>,
    base_url: String,

    /// Credentials of the last successful login, used to renew the session
    credentials: Option<Credentials>,
    token: Option<String>,
}

impl ReaderClient {
    /// Create a client; no connection is made until the first request
    pub fn new(config: &Config, cancel: CancellationToken) -> Self {
        let transient = TransientRetry::from_config(
            &config.retry,
            config.general.wait_time,
            config.retry.network_attempts,
        );

        Self {
            request_config: config.request.clone(),
            endpoints: config.endpoints.clone(),
            transient,
            login_attempts: config.retry.login_attempts,
            rate_limit: RateLimitRetry::from_config(&config.retry),
            cancel,
            http: None,
            base_url: String::new(),
            credentials: None,
            token: None,
        }
    }

    /// Whether a session token is held
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Whether credentials for renewing the session are held
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Endpoint paths this client was configured with
    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    /// Issue an API call
    ///
    /// Returns the last response obtained. Non-200 statuses are not errors; callers
    /// decide what they mean. Errors are reserved for interruption and for requests
    /// that can never succeed (such as an unparsable URL).
    pub async fn request(&mut self, request: &ApiRequest) -> Result<Response> {
        let attempts = request
            .max_attempts
            .unwrap_or(self.transient.max_attempts);
        let mut renewed = false;

        loop {
            let response = self.send_with_retry(request, attempts).await?;
            if !self.rate_limit.applies_to(response.status) {
                return Ok(response);
            }

            self.cool_down(request).await?;

            // Once per run of consecutive 503s
            if request.require_auth && !renewed {
                self.relogin().await?;
                renewed = true;
            }
        }
    }

    /// Log in and store the session token
    ///
    /// On rejection the stored credentials are dropped, so later rate-limit recovery
    /// does not keep retrying a password the service refused.
    pub async fn login(&mut self, credentials: Credentials) -> Result<()> {
        self.token = None;

        let request = ApiRequest::post_form(
            self.endpoints.login_path.clone(),
            [
                ("Email", credentials.email.as_str()),
                ("Passwd", credentials.password.as_str()),
                ("service", "reader"),
                ("accountType", "HOSTED_OR_GOOGLE"),
            ],
        )
        .attempts(self.login_attempts)
        .unauthenticated();

        let response = self.request_without_renewal(&request).await?;
        if !response.is_success() {
            error!(
                status = response.status,
                "Login failed, check network, email and password"
            );
            self.credentials = None;
            return Err(AuthError::Rejected {
                status: response.status,
            }
            .into());
        }

        let token = response
            .text()
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(AUTH_LINE_PREFIX))
            .map(|t| t.trim().to_string());

        match token {
            Some(token) if !token.is_empty() => {
                info!(user = %credentials.email, "Logged in");
                self.token = Some(token);
                self.credentials = Some(credentials);
                Ok(())
            }
            _ => {
                error!("Auth token not found in login response, verify email and password");
                self.credentials = None;
                Err(AuthError::TokenMissing.into())
            }
        }
    }

    /// Renew the session with the stored credentials; a no-op without them
    ///
    /// A rejected renewal is logged and swallowed: the request that triggered it will
    /// fail on its own and the caller handles that status.
    pub async fn relogin(&mut self) -> Result<()> {
        let Some(credentials) = self.credentials.clone() else {
            debug!("No stored credentials, skipping re-authentication");
            return Ok(());
        };

        match self.login(credentials).await {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "Re-authentication failed");
                Ok(())
            }
        }
    }

    /// Rate-limit loop without session renewal, used by the login call itself
    async fn request_without_renewal(&mut self, request: &ApiRequest) -> Result<Response> {
        let attempts = request
            .max_attempts
            .unwrap_or(self.transient.max_attempts);

        loop {
            let response = self.send_with_retry(request, attempts).await?;
            if !self.rate_limit.applies_to(response.status) {
                return Ok(response);
            }
            self.cool_down(request).await?;
        }
    }

    async fn cool_down(&mut self, request: &ApiRequest) -> Result<()> {
        warn!(
            path = %request.path,
            cooldown_secs = self.rate_limit.cooldown.as_secs(),
            "Client rate limited by the service, waiting before continuing"
        );
        sleep_unless_cancelled(self.rate_limit.cooldown, &self.cancel).await?;
        self.reconnect()
    }

    /// Bounded retry over transient network failures
    async fn send_with_retry(&mut self, request: &ApiRequest, attempts: u32) -> Result<Response> {
        let policy = self.transient.with_attempts(attempts);
        let mut backoff = policy.backoff();

        for attempt in 1..=policy.max_attempts {
            match self.send_once(request).await {
                Ok(response) => {
                    debug!(path = %request.path, status = response.status, "Response received");
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        path = %request.path,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Network error"
                    );
                    self.disconnect();
                    if attempt < policy.max_attempts {
                        sleep_unless_cancelled(backoff.next_delay(), &self.cancel).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            path = %request.path,
            attempts = policy.max_attempts,
            "Giving up after repeated network errors"
        );
        Ok(Response::failed())
    }

    async fn send_once(&mut self, request: &ApiRequest) -> Result<Response> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let client = self.connection()?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match &request.form {
            Some(form) => client.post(&url).form(form),
            None => client.get(&url),
        };
        if request.require_auth
            && let Some(token) = &self.token
        {
            builder = builder.header(
                reqwest::header::AUTHORIZATION,
                format!("GoogleLogin auth={token}"),
            );
        }

        let exchange = async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(Response {
                status,
                body: body.to_vec(),
            })
        };

        tokio::select! {
            result = exchange => result.map_err(Error::from),
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// The current connection, creating one against a random server if needed
    fn connection(&mut self) -> Result<reqwest::Client> {
        if let Some(client) = &self.http {
            return Ok(client.clone());
        }
        self.reconnect()?;
        self.http
            .clone()
            .ok_or_else(|| Error::Other("HTTP client missing after reconnect".to_string()))
    }

    /// Drop the current connection and open a new one against a random server
    fn reconnect(&mut self) -> Result<()> {
        self.disconnect();

        let server = self
            .request_config
            .servers
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        let client = reqwest::Client::builder()
            .user_agent(self.request_config.user_agent.clone())
            .timeout(self.request_config.timeout)
            .gzip(true)
            .build()?;

        debug!(server = %server, "Connected");
        self.base_url = server.trim_end_matches('/').to_string();
        self.http = Some(client);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.http = None;
    }
}

impl std::fmt::Debug for ReaderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderClient")
            .field("base_url", &self.base_url)
            .field("connected", &self.http.is_some())
            .field("authenticated", &self.token.is_some())
            .field("credentials", &self.credentials)
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
