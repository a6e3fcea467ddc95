//! Live quote streaming over a persistent websocket connection.
//!
//! - [`StreamingClient`] - connection lifecycle, subscriptions, heartbeat, reconnect
//! - [`EventHub`] - callback registration and the publish operation
//! - [`AsyncBridge`] - awaitable sequence of events built on the hub

mod bridge;
mod client;
mod error;
mod events;
mod message;

pub use bridge::AsyncBridge;
pub use client::{ConnectionState, NORMAL_CLOSURE, StreamingClient};
pub use error::StreamError;
pub use events::{EventHub, HandlerId};
pub use message::{ControlMessage, PriceUpdate, StreamEvent, decode_frame};
