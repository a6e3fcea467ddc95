//! Failure classification and linear retry backoff.
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - no response, or 408/429/5xx; retried
//! - [`FailureType::Authentication`] - credentials rejected on an authenticated
//!   path; credentials are reset, then retried
//! - [`FailureType::Terminal`] - other client errors; never retried
//!
//! The [`RetryPolicy`] then decides whether another attempt is allowed and
//! how long to wait first.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use yfwire::transport::{RetryDecision, RetryPolicy, TransportError, classify_error};
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(500));
//! let error = TransportError::http_status("https://query1.finance.yahoo.com/v8", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_millis(500));
//!         assert_eq!(attempt, 2);
//!     }
//!     other => panic!("unexpected decision: {other:?}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::TransportError;
use crate::config::{DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};

/// Classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection reset, timeout, 408, 429, 503.
    Transient,

    /// The crumb or session cookies were rejected on an authenticated path.
    ///
    /// Retried after invalidating the crumb and clearing cookies.
    Authentication,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404, 400, undecodable body, invalid URL.
    Terminal,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (the first retry is attempt 2).
        attempt: u32,
    },

    /// The failure is terminal; surface it as-is.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },

    /// The attempt cap has been reached.
    Exhausted {
        /// Attempts made, including the initial one.
        attempts: u32,
    },
}

/// Retry cap and linear backoff.
///
/// Attempt `n` (1-indexed) that fails waits `base_delay * n` before attempt
/// `n + 1`. With `max_retries = 3` a request is tried at most 4 times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    max_retries: u32,

    /// Base delay multiplied by the attempt number.
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given retry count and base delay.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Returns the number of retries after the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the maximum number of attempts, including the initial one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "trace", skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Terminal {
            return RetryDecision::DoNotRetry {
                reason: "terminal failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts() {
            debug!(attempt, max_attempts = self.max_attempts(), "max attempts reached");
            return RetryDecision::Exhausted { attempts: attempt };
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            attempt: attempt + 1,
        }
    }

    /// Delay to wait after attempt `attempt` failed: `base_delay * attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Classifies a transport error into a failure type.
///
/// | Error | Type |
/// |-------|------|
/// | Network, Timeout | Transient |
/// | HttpStatus (408, 429, 5xx) | Transient |
/// | Authentication | Authentication |
/// | Client, Decode, InvalidUrl, TooManyRedirects | Terminal |
/// | Config, ClientBuild | Terminal |
/// | MaxRetriesExceeded | Terminal |
#[must_use]
pub fn classify_error(error: &TransportError) -> FailureType {
    match error {
        TransportError::Network { .. }
        | TransportError::Timeout { .. }
        | TransportError::HttpStatus { .. } => FailureType::Transient,
        TransportError::Authentication { .. } => FailureType::Authentication,
        TransportError::Client { .. }
        | TransportError::Decode { .. }
        | TransportError::InvalidUrl { .. }
        | TransportError::TooManyRedirects { .. }
        | TransportError::Config(_)
        | TransportError::ClientBuild { .. }
        | TransportError::MaxRetriesExceeded { .. } => FailureType::Terminal,
    }
}

/// Builds the error for a non-success response.
///
/// On an authenticated path, 401/403 and any 4xx whose body reports an
/// invalid crumb or cookie are authentication failures. Elsewhere:
///
/// | Status | Error |
/// |--------|-------|
/// | 408, 429 | HttpStatus (transient) |
/// | 5xx | HttpStatus (transient) |
/// | other 4xx | Client (terminal) |
/// | anything else | Client (terminal) |
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn status_error(url: &str, status: u16, requires_auth: bool, body: &[u8]) -> TransportError {
    let client_error = (400..500).contains(&status);
    if requires_auth && client_error && (matches!(status, 401 | 403) || reports_invalid_credentials(body)) {
        return TransportError::authentication(url, status);
    }

    match status {
        408 => TransportError::http_status(url, status), // Request Timeout
        429 => TransportError::http_status(url, status), // Too Many Requests
        500..=599 => TransportError::http_status(url, status),
        _ => TransportError::client(url, status),
    }
}

fn reports_invalid_credentials(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body).to_ascii_lowercase();
    text.contains("invalid crumb") || text.contains("invalid cookie")
}
