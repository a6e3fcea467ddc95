//! Error types for the transport layer.
//!
//! Each variant carries the URL it concerns so callers can report failures
//! without threading context through.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by [`Transport`](super::Transport) and the session it wraps.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response was received (DNS, connect, TLS, reset).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The attempt exceeded the configured per-attempt timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// A transient HTTP status (408, 429, 5xx).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The crumb or cookies were rejected on an authenticated path.
    #[error("authentication rejected (HTTP {status}) requesting {url}")]
    Authentication {
        /// The URL that rejected the credentials.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A client error that retrying will not fix.
    #[error("HTTP {status} requesting {url}")]
    Client {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded as requested.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// The URL whose body failed to decode.
        url: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The URL is malformed, or a redirect pointed somewhere unusable.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The redirect chain exceeded the hop limit.
    #[error("too many redirects starting from {url}")]
    TooManyRedirects {
        /// The URL that started the chain.
        url: String,
    },

    /// The client configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// Every allowed attempt failed.
    #[error("max retries exceeded for {url} after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        /// The requested URL.
        url: String,
        /// Attempts made, including the initial one.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Creates a network error, mapping reqwest timeouts to [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a transient HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an authentication-rejected error.
    pub fn authentication(url: impl Into<String>, status: u16) -> Self {
        Self::Authentication {
            url: url.into(),
            status,
        }
    }

    /// Creates a terminal client error.
    pub fn client(url: impl Into<String>, status: u16) -> Self {
        Self::Client {
            url: url.into(),
            status,
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Wraps the last failure once the attempt cap is reached.
    pub fn max_retries_exceeded(url: impl Into<String>, attempts: u32, last: Self) -> Self {
        Self::MaxRetriesExceeded {
            url: url.into(),
            attempts,
            last: Box::new(last),
        }
    }

    /// HTTP status associated with this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. }
            | Self::Authentication { status, .. }
            | Self::Client { status, .. } => Some(*status),
            Self::MaxRetriesExceeded { last, .. } => last.status(),
            _ => None,
        }
    }
}
