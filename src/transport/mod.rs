//! HTTP transport: session, pacing, failure classification, and retries.

mod client;
mod error;
mod pacing;
mod retry;
mod session;

pub use client::{AUTH_PATH_PREFIXES, Transport, requires_auth};
pub use error::TransportError;
pub use pacing::Pacer;
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error, status_error};
pub use session::{RawResponse, RequestBody, RequestOptions, Session, encode_form, redacted};
