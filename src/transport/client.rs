//! Authenticated, retrying HTTP transport.
//!
//! [`Transport`] is the single entry point higher-level accessors use. For
//! paths under an authenticated namespace it asks the [`AuthEngine`] for a
//! crumb and appends it as the `crumb` query parameter. Failures are
//! classified and retried with linear backoff; authentication-class failures
//! also drop the crumb and cookies so the next attempt re-authenticates.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, status_error};
use super::session::{RawResponse, RequestBody, RequestOptions, Session};
use super::TransportError;
use crate::auth::{AuthEngine, CookieStore};
use crate::config::ClientConfig;

/// Path prefixes of the provider's authenticated namespaces.
pub const AUTH_PATH_PREFIXES: &[&str] = &[
    "/v1/finance/",
    "/v6/finance/",
    "/v7/finance/",
    "/v8/finance/",
    "/v10/finance/",
    "/v11/finance/",
    "/ws/fundamentals-timeseries/",
];

/// Whether requests to `url` need a crumb.
#[must_use]
pub fn requires_auth(url: &Url) -> bool {
    let path = url.path();
    AUTH_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// HTTP transport with crumb handling, cookie persistence, pacing, and retries.
///
/// # Example
///
/// ```no_run
/// use yfwire::config::ClientConfig;
/// use yfwire::transport::Transport;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Transport::new(&ClientConfig::default())?;
/// let chart: serde_json::Value = transport
///     .get_json("https://query2.finance.yahoo.com/v8/finance/chart/AAPL")
///     .await?;
/// println!("{chart}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Transport {
    session: Arc<Session>,
    auth: Arc<AuthEngine>,
    policy: RetryPolicy,
}

impl Transport {
    /// Builds the cookie store, session, and authentication engine from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] when validation fails and
    /// [`TransportError::ClientBuild`] when the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let cookies = Arc::new(CookieStore::new(config.cookie_jar.resolved_path()));
        let session = Arc::new(Session::new(config, cookies)?);
        let auth = Arc::new(AuthEngine::new(
            Arc::clone(&session),
            config.endpoints.clone(),
            config.strategy,
        ));
        Ok(Self::from_parts(
            session,
            auth,
            RetryPolicy::new(config.retries, config.retry_delay),
        ))
    }

    /// Assembles a transport from already-built parts.
    #[must_use]
    pub fn from_parts(session: Arc<Session>, auth: Arc<AuthEngine>, policy: RetryPolicy) -> Self {
        Self { session, auth, policy }
    }

    /// The authentication engine.
    #[must_use]
    pub fn auth(&self) -> &Arc<AuthEngine> {
        &self.auth
    }

    /// The shared cookie store.
    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieStore> {
        self.session.cookies()
    }

    /// The retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issues a request with crumb, cookies, and retries.
    ///
    /// Returns the first 2xx response. Non-2xx responses and network failures
    /// are classified: transient and authentication-class failures are retried
    /// up to the policy's cap, terminal ones are returned at once.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] for a malformed `url`, the
    /// terminal error as-is, or [`TransportError::MaxRetriesExceeded`] wrapping
    /// the last failure once the cap is hit.
    #[instrument(skip(self, method, url, body, options), fields(method = %method, url = %url))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&RequestBody>,
        options: Option<&RequestOptions>,
    ) -> Result<RawResponse, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::invalid_url(url))?;
        let needs_auth = requires_auth(&parsed);
        let default_options = RequestOptions::default();
        let options = options.unwrap_or(&default_options);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, needs_auth, "sending request");

            let error = match self.attempt(&method, &parsed, needs_auth, body, options).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };
            let failure_type = classify_error(&error);

            match self.policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    if failure_type == FailureType::Authentication {
                        self.auth.invalidate();
                        self.session.cookies().clear(None);
                    }
                    debug!(
                        attempt = next_attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        failure = ?failure_type,
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, error = %error, "not retrying request");
                    return Err(error);
                }
                RetryDecision::Exhausted { attempts } => {
                    warn!(attempts, error = %error, "request failed after all attempts");
                    return Err(TransportError::max_retries_exceeded(url, attempts, error));
                }
            }
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        needs_auth: bool,
        body: Option<&RequestBody>,
        options: &RequestOptions,
    ) -> Result<RawResponse, TransportError> {
        let mut target = url.clone();
        if needs_auth && let Some(crumb) = self.auth.get_crumb().await {
            set_crumb(&mut target, &crumb);
        }

        let response = self.session.send(method.clone(), target, body, options).await?;
        self.session.cookies().persist();

        if response.is_success() {
            Ok(response)
        } else {
            Err(status_error(
                url.as_str(),
                response.status(),
                needs_auth,
                response.body(),
            ))
        }
    }

    /// GETs `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn get_text(&self, url: &str) -> Result<String, TransportError> {
        Ok(self.request(Method::GET, url, None, None).await?.text())
    }

    /// GETs `url` and parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request), plus [`TransportError::Decode`]
    /// when the body is not well-formed.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransportError> {
        self.request(Method::GET, url, None, None).await?.json()
    }
}

/// Sets the `crumb` query parameter, replacing any existing one.
fn set_crumb(url: &mut Url, crumb: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "crumb")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("crumb", crumb);
}
