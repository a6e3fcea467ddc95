//! Error types for the streaming client.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::config::ConfigError;

/// Errors surfaced by [`StreamingClient`](super::StreamingClient).
#[derive(Debug, Error)]
pub enum StreamError {
    /// A subscription change was attempted without a live connection.
    #[error("not connected to the streaming endpoint")]
    NotConnected,

    /// The handshake failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// The streaming endpoint.
        url: String,
        /// The underlying websocket error.
        #[source]
        source: Box<tungstenite::Error>,
    },

    /// The handshake did not complete within the connection timeout.
    #[error("connecting to {url} timed out after {timeout:?}")]
    ConnectTimeout {
        /// The streaming endpoint.
        url: String,
        /// The configured bound.
        timeout: Duration,
    },

    /// `disconnect` was called while the handshake was in flight.
    #[error("connection attempt to {url} was cancelled by disconnect")]
    Cancelled {
        /// The streaming endpoint.
        url: String,
    },

    /// Writing a frame failed.
    #[error("failed to send frame: {0}")]
    Send(#[source] Box<tungstenite::Error>),

    /// A control frame could not be encoded.
    #[error("failed to encode control frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// The stream configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StreamError {
    /// Creates a handshake error.
    pub fn connect(url: impl Into<String>, source: tungstenite::Error) -> Self {
        Self::Connect {
            url: url.into(),
            source: Box::new(source),
        }
    }

    /// Creates a send error.
    pub fn send(source: tungstenite::Error) -> Self {
        Self::Send(Box::new(source))
    }
}
