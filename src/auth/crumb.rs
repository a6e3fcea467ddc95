//! Crumb acquisition with two interchangeable strategies.
//!
//! [`Strategy::Basic`] visits a bootstrap page for session cookies and then
//! asks the crumb endpoint. [`Strategy::Consent`] walks the consent form
//! (page, collect, copy) before asking a secondary crumb endpoint.
//!
//! The active strategy is sticky for the engine's lifetime. When it fails,
//! the engine switches to the other one, clearing crumb and cookies, and
//! tries exactly once more. If that fails too, callers get no crumb and
//! proceed unauthenticated.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use regex::Regex;
use reqwest::Method;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::Endpoints;
use crate::transport::{RawResponse, RequestBody, RequestOptions, Session, TransportError};

/// Landing page the consent form redirects to when done.
const CONSENT_DONE_URL: &str = "https://finance.yahoo.com/";

#[allow(clippy::expect_used)]
static INPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("input tag regex is valid"));

#[allow(clippy::expect_used)]
static NAME_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s*=\s*["']([^"']*)["']"#).expect("name attribute regex is valid")
});

#[allow(clippy::expect_used)]
static VALUE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bvalue\s*=\s*["']([^"']*)["']"#).expect("value attribute regex is valid")
});

/// Procedure used to obtain a crumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Bootstrap page for cookies, then the crumb endpoint.
    #[default]
    Basic,
    /// Consent form flow, then the secondary crumb endpoint.
    Consent,
}

impl Strategy {
    /// The fallback strategy.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Basic => Self::Consent,
            Self::Consent => Self::Basic,
        }
    }

    /// Lowercase name used in config files and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Consent => "consent",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "consent" => Ok(Self::Consent),
            other => Err(format!("unknown auth strategy '{other}' (expected basic or consent)")),
        }
    }
}

/// Why a strategy failed to produce a crumb.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A flow step got no usable response.
    #[error("request failed: {0}")]
    Request(#[from] TransportError),

    /// The crumb endpoint signalled rate limiting.
    #[error("crumb endpoint {url} is rate limiting")]
    RateLimited {
        /// The crumb endpoint.
        url: String,
    },

    /// The crumb endpoint answered with an empty body.
    #[error("crumb endpoint {url} returned an empty crumb")]
    EmptyCrumb {
        /// The crumb endpoint.
        url: String,
    },

    /// A flow step answered with an unexpected status.
    #[error("HTTP {status} from {url}")]
    UnexpectedStatus {
        /// The endpoint.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The consent page lacks a required hidden form field.
    #[error("consent page has no `{field}` field")]
    MissingFormField {
        /// The missing field name.
        field: &'static str,
    },

    /// A configured endpoint is not a valid URL.
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug)]
struct AuthState {
    strategy: Strategy,
    crumb: Option<String>,
}

/// Obtains, caches, and invalidates the crumb.
///
/// Shares the [`Session`] (and so the cookie store and pacer) with the
/// transport. Acquisitions are serialized; cached reads are not.
#[derive(Debug)]
pub struct AuthEngine {
    session: Arc<Session>,
    endpoints: Endpoints,
    state: Mutex<AuthState>,
    refresh: tokio::sync::Mutex<()>,
}

impl AuthEngine {
    /// Creates an engine starting on `strategy` with no crumb.
    #[must_use]
    pub fn new(session: Arc<Session>, endpoints: Endpoints, strategy: Strategy) -> Self {
        Self {
            session,
            endpoints,
            state: Mutex::new(AuthState { strategy, crumb: None }),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The active strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.lock().strategy
    }

    /// Whether a crumb is cached.
    #[must_use]
    pub fn has_crumb(&self) -> bool {
        self.lock().crumb.is_some()
    }

    /// Whether the shared store holds any live cookie.
    #[must_use]
    pub fn has_cookies(&self) -> bool {
        self.session.cookies().has_cookies()
    }

    /// Returns the cached crumb, or acquires one.
    ///
    /// Runs the active strategy; on failure switches to the other strategy
    /// and tries once more. Returns `None` when both fail.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_crumb(&self) -> Option<String> {
        if let Some(crumb) = self.lock().crumb.clone() {
            return Some(crumb);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have finished an acquisition while we waited.
        if let Some(crumb) = self.lock().crumb.clone() {
            return Some(crumb);
        }

        let strategy = self.strategy();
        match self.acquire(strategy).await {
            Ok(crumb) => return Some(crumb),
            Err(error) => {
                warn!(strategy = %strategy, error = %error, "crumb strategy failed");
            }
        }

        let fallback = strategy.other();
        self.switch_strategy(fallback);
        match self.acquire(fallback).await {
            Ok(crumb) => Some(crumb),
            Err(error) => {
                warn!(strategy = %fallback, error = %error, "fallback crumb strategy failed; continuing without crumb");
                None
            }
        }
    }

    /// Drops the cached crumb and acquires a fresh one.
    pub async fn refresh(&self) -> Option<String> {
        self.invalidate();
        self.get_crumb().await
    }

    /// Clears the cached crumb, keeping the strategy.
    pub fn invalidate(&self) {
        if self.lock().crumb.take().is_some() {
            debug!("invalidated cached crumb");
        }
    }

    /// Makes `to` the active strategy.
    ///
    /// No-op if already active; otherwise clears the crumb and all cookies.
    pub fn switch_strategy(&self, to: Strategy) {
        let mut state = self.lock();
        if state.strategy == to {
            return;
        }
        info!(from = %state.strategy, to = %to, "switching crumb strategy");
        state.strategy = to;
        state.crumb = None;
        drop(state);
        self.session.cookies().clear(None);
    }

    async fn acquire(&self, strategy: Strategy) -> Result<String, AuthError> {
        let crumb = match strategy {
            Strategy::Basic => self.basic_flow().await?,
            Strategy::Consent => self.consent_flow().await?,
        };
        self.session.cookies().persist();

        let mut state = self.lock();
        // Only trust the crumb if nobody switched strategy mid-flight.
        if state.strategy == strategy {
            state.crumb = Some(crumb.clone());
        }
        info!(strategy = %strategy, "obtained crumb");
        Ok(crumb)
    }

    async fn basic_flow(&self) -> Result<String, AuthError> {
        // The bootstrap page answers 404 on purpose; only its cookies matter.
        let bootstrap = self.get(&self.endpoints.bootstrap).await?;
        debug!(status = bootstrap.status(), "visited bootstrap page");
        self.fetch_crumb(&self.endpoints.crumb).await
    }

    async fn consent_flow(&self) -> Result<String, AuthError> {
        let page = self.get(&self.endpoints.consent).await?;
        if !page.is_success() {
            return Err(AuthError::UnexpectedStatus {
                url: page.url().to_string(),
                status: page.status(),
            });
        }
        let html = page.text();
        let csrf_token =
            hidden_input(&html, "csrfToken").ok_or(AuthError::MissingFormField { field: "csrfToken" })?;
        let session_id =
            hidden_input(&html, "sessionId").ok_or(AuthError::MissingFormField { field: "sessionId" })?;
        debug!("extracted consent form fields");

        let form = RequestBody::Form(vec![
            ("agree".to_string(), "agree".to_string()),
            ("consentUUID".to_string(), "default".to_string()),
            ("sessionId".to_string(), session_id.clone()),
            ("csrfToken".to_string(), csrf_token),
            ("originalDoneUrl".to_string(), CONSENT_DONE_URL.to_string()),
            ("namespace".to_string(), "yahoo".to_string()),
        ]);
        let collect = with_session_id(&self.endpoints.collect_consent, &session_id)?;
        let collected = self
            .session
            .send(Method::POST, collect, Some(&form), &RequestOptions::default())
            .await?;
        debug!(status = collected.status(), "submitted consent form");

        let copy = with_session_id(&self.endpoints.copy_consent, &session_id)?;
        let copied = self
            .session
            .send(Method::GET, copy, None, &RequestOptions::default())
            .await?;
        debug!(status = copied.status(), "finalized consent");

        self.fetch_crumb(&self.endpoints.consent_crumb).await
    }

    async fn fetch_crumb(&self, endpoint: &str) -> Result<String, AuthError> {
        let response = self.get(endpoint).await?;
        let body = response.text();
        if response.status() == 429 || body.contains("Too Many Requests") {
            return Err(AuthError::RateLimited {
                url: endpoint.to_string(),
            });
        }
        if !response.is_success() {
            return Err(AuthError::UnexpectedStatus {
                url: endpoint.to_string(),
                status: response.status(),
            });
        }
        let crumb = body.trim();
        if crumb.is_empty() {
            return Err(AuthError::EmptyCrumb {
                url: endpoint.to_string(),
            });
        }
        Ok(crumb.to_string())
    }

    async fn get(&self, endpoint: &str) -> Result<RawResponse, AuthError> {
        let url = parse_endpoint(endpoint)?;
        Ok(self
            .session
            .send(Method::GET, url, None, &RequestOptions::default())
            .await?)
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, AuthError> {
    Url::parse(endpoint).map_err(|_| AuthError::InvalidEndpoint(endpoint.to_string()))
}

fn with_session_id(endpoint: &str, session_id: &str) -> Result<Url, AuthError> {
    let mut url = parse_endpoint(endpoint)?;
    url.query_pairs_mut().append_pair("sessionId", session_id);
    Ok(url)
}

/// Value of the `<input>` named `name`, in either attribute order.
fn hidden_input(html: &str, name: &str) -> Option<String> {
    INPUT_TAG.find_iter(html).find_map(|tag| {
        let tag = tag.as_str();
        let tag_name = NAME_ATTR.captures(tag)?.get(1)?.as_str();
        if tag_name != name {
            return None;
        }
        let value = VALUE_ATTR.captures(tag)?.get(1)?.as_str();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::CookieStore;
    use crate::config::ClientConfig;

    const CONSENT_PAGE: &str = r#"<html><body><form method="post">
        <input type="hidden" name="csrfToken" value="tok123">
        <input value="sess-9" type="hidden" name="sessionId">
        <button name="agree" value="agree">Accept</button>
        </form></body></html>"#;

    fn engine(server: &MockServer, strategy: Strategy) -> AuthEngine {
        let config = ClientConfig {
            pacing_delay: Duration::ZERO,
            ..ClientConfig::default()
        };
        let session = Arc::new(Session::new(&config, Arc::new(CookieStore::in_memory())).unwrap());
        AuthEngine::new(session, Endpoints::with_base(&server.uri()), strategy)
    }

    #[test]
    fn test_strategy_from_str_and_other() {
        assert_eq!("Basic".parse::<Strategy>().unwrap(), Strategy::Basic);
        assert_eq!(" consent ".parse::<Strategy>().unwrap(), Strategy::Consent);
        assert!("oauth".parse::<Strategy>().is_err());
        assert_eq!(Strategy::Basic.other(), Strategy::Consent);
        assert_eq!(Strategy::Consent.other(), Strategy::Basic);
    }

    #[test]
    fn test_hidden_input_either_attribute_order() {
        assert_eq!(hidden_input(CONSENT_PAGE, "csrfToken").as_deref(), Some("tok123"));
        assert_eq!(hidden_input(CONSENT_PAGE, "sessionId").as_deref(), Some("sess-9"));
        assert_eq!(hidden_input(CONSENT_PAGE, "missing"), None);
        assert_eq!(hidden_input(r#"<input name="csrfToken" value="">"#, "csrfToken"), None);
    }

    #[tokio::test]
    async fn test_basic_strategy_caches_crumb() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bootstrap"))
            .respond_with(ResponseTemplate::new(404).insert_header("Set-Cookie", "A3=d=abc; Path=/"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb"))
            .respond_with(ResponseTemplate::new(200).set_body_string("crumb-basic"))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server, Strategy::Basic);
        assert_eq!(engine.get_crumb().await.as_deref(), Some("crumb-basic"));
        assert_eq!(engine.get_crumb().await.as_deref(), Some("crumb-basic"));
        assert!(engine.has_crumb());
        assert!(engine.has_cookies());
        assert_eq!(engine.strategy(), Strategy::Basic);
    }

    #[tokio::test]
    async fn test_consent_strategy_submits_form() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/consent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CONSENT_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/collectConsent"))
            .and(query_param("sessionId", "sess-9"))
            .and(body_string_contains("csrfToken=tok123"))
            .and(body_string_contains("agree=agree"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/copyConsent?sessionId=sess-9"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/copyConsent"))
            .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "GUC=ok; Path=/"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("crumb-consent\n"))
            .mount(&server)
            .await;

        let engine = engine(&server, Strategy::Consent);
        assert_eq!(engine.get_crumb().await.as_deref(), Some("crumb-consent"));
    }

    #[tokio::test]
    async fn test_falls_back_to_other_strategy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bootstrap"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CONSENT_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/collectConsent"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/copyConsent"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("crumb-b"))
            .mount(&server)
            .await;

        let engine = engine(&server, Strategy::Basic);
        assert_eq!(engine.get_crumb().await.as_deref(), Some("crumb-b"));
        // Sticky: the next acquisition starts on the consent strategy.
        assert_eq!(engine.strategy(), Strategy::Consent);
        engine.invalidate();
        assert_eq!(engine.get_crumb().await.as_deref(), Some("crumb-b"));
    }

    #[tokio::test]
    async fn test_both_strategies_failing_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bootstrap"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb"))
            .respond_with(ResponseTemplate::new(200).set_body_string("   "))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>no form</html>"))
            .mount(&server)
            .await;

        let engine = engine(&server, Strategy::Basic);
        assert_eq!(engine.get_crumb().await, None);
        assert!(!engine.has_crumb());
        assert_eq!(engine.strategy(), Strategy::Consent);
    }

    #[tokio::test]
    async fn test_switch_strategy_clears_crumb_and_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bootstrap"))
            .respond_with(ResponseTemplate::new(404).insert_header("Set-Cookie", "A3=x; Path=/"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb"))
            .respond_with(ResponseTemplate::new(200).set_body_string("c1"))
            .mount(&server)
            .await;

        let engine = engine(&server, Strategy::Basic);
        engine.get_crumb().await.unwrap();
        assert!(engine.has_cookies());

        engine.switch_strategy(Strategy::Basic);
        assert!(engine.has_crumb(), "switching to the active strategy is a no-op");

        engine.switch_strategy(Strategy::Consent);
        assert!(!engine.has_crumb());
        assert!(!engine.has_cookies());
        assert_eq!(engine.strategy(), Strategy::Consent);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_strategy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bootstrap"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/test/getcrumb"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .expect(2)
            .mount(&server)
            .await;

        let engine = engine(&server, Strategy::Basic);
        engine.get_crumb().await.unwrap();
        engine.invalidate();
        assert!(!engine.has_crumb());
        assert_eq!(engine.refresh().await.as_deref(), Some("fresh"));
        assert_eq!(engine.strategy(), Strategy::Basic);
    }
}
