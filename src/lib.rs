//! yfwire: authenticated transport and live quote streaming for Yahoo Finance.
//!
//! The provider's HTTP surface is unofficial and guarded by session cookies,
//! a consent wall, and a rotating "crumb" token. This library covers the
//! layer every data accessor depends on, plus the live price stream.
//!
//! # Architecture
//!
//! - [`config`] - client and stream settings, validation
//! - [`auth`] - cookie store with Netscape-format persistence, crumb engine
//! - [`transport`] - paced, retrying HTTP with crumb and cookie handling
//! - [`stream`] - websocket quote streaming, event hub, async bridge

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use auth::{AuthEngine, CookieStore, Strategy};
pub use config::{ClientConfig, StreamConfig};
pub use stream::{AsyncBridge, StreamError, StreamEvent, StreamingClient};
pub use transport::{Transport, TransportError};
