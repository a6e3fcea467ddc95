//! Shared HTTP session: one reqwest client, the cookie store, and pacing.
//!
//! The reqwest client is built without redirect following or a cookie jar.
//! The session follows redirects itself so `Set-Cookie` headers on every hop
//! land in the [`CookieStore`]; the consent flow depends on cookies that are
//! only ever set mid-redirect.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, LOCATION};
use reqwest::{Client, Method, StatusCode, redirect};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::{Pacer, TransportError};
use crate::auth::CookieStore;
use crate::config::ClientConfig;

/// Maximum redirect hops followed for one request.
const MAX_REDIRECTS: usize = 10;

/// Request body variants.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` pairs, order preserved.
    Form(Vec<(String, String)>),
    /// JSON document.
    Json(serde_json::Value),
    /// Raw text.
    Text(String),
}

impl RequestBody {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Form(pairs) => request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(pairs)),
            Self::Json(value) => request.json(value),
            Self::Text(text) => request.body(text.clone()),
        }
    }
}

/// URL-encodes form pairs.
#[must_use]
pub fn encode_form(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers sent on every hop.
    pub headers: Vec<(String, String)>,
    /// Overrides the client-wide per-attempt timeout.
    pub timeout: Option<Duration>,
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    url: String,
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl RawResponse {
    /// Final URL after redirects.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response headers of the final hop.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Decode`] when the body is not well-formed.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::decode(&self.url, e))
    }
}

/// The HTTP client, cookie store, and pacer shared by the transport and the
/// authentication flows.
#[derive(Debug)]
pub struct Session {
    client: Client,
    cookies: Arc<CookieStore>,
    pacer: Pacer,
}

impl Session {
    /// Builds a session from client settings around an existing cookie store.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] for an unusable proxy and
    /// [`TransportError::ClientBuild`] when reqwest rejects the settings.
    pub fn new(config: &ClientConfig, cookies: Arc<CookieStore>) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::none())
            .gzip(true);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(proxy.to_reqwest()?);
        }

        let client = builder
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;

        Ok(Self {
            client,
            cookies,
            pacer: Pacer::new(config.pacing_delay),
        })
    }

    /// The shared cookie store.
    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieStore> {
        &self.cookies
    }

    /// The shared pacer.
    #[must_use]
    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Sends one request, following redirects, with cookies attached and captured.
    ///
    /// Waits the pacing delay first. Any received status is returned as a
    /// response; only failures to get a response at all are errors. A 303, or
    /// a 301/302 answering a POST, continues as a GET without body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`]/[`TransportError::Timeout`] when no
    /// response arrives, and [`TransportError::TooManyRedirects`] past the hop limit.
    #[instrument(level = "debug", skip(self, url, body, options), fields(method = %method, url = %redacted(&url)))]
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&RequestBody>,
        options: &RequestOptions,
    ) -> Result<RawResponse, TransportError> {
        self.pacer.pace().await;

        let origin = redacted(&url);
        let mut method = method;
        let mut url = url;
        let mut body = body;

        for hop in 0..=MAX_REDIRECTS {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(cookie_header) = self.cookies.header_for(&url) {
                request = request.header(COOKIE, cookie_header);
            }
            for (name, value) in &options.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(timeout) = options.timeout {
                request = request.timeout(timeout);
            }
            if let Some(body) = body {
                request = body.apply(request);
            }

            let response = request
                .send()
                .await
                .map_err(|e| TransportError::network(redacted(&url), e))?;
            self.cookies.update(&url, response.headers());

            let status = response.status();
            if status.is_redirection()
                && let Some(next) = redirect_target(&url, response.headers())
            {
                debug!(hop, status = status.as_u16(), to = %redacted(&next), "following redirect");
                if status == StatusCode::SEE_OTHER
                    || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
                        && method == Method::POST)
                {
                    method = Method::GET;
                    body = None;
                }
                url = next;
                continue;
            }

            let headers = response.headers().clone();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::network(redacted(&url), e))?;
            debug!(status = status.as_u16(), bytes = bytes.len(), "received response");
            return Ok(RawResponse {
                url: redacted(&url),
                status: status.as_u16(),
                headers,
                body: bytes.to_vec(),
            });
        }

        Err(TransportError::TooManyRedirects { url: origin })
    }
}

/// Renders `url` with any `crumb` query parameter removed.
#[must_use]
pub fn redacted(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == "crumb") {
        return url.to_string();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "crumb")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut clean = url.clone();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(kept);
    }
    clean.to_string()
}

fn redirect_target(current: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}
