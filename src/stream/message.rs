//! Streaming wire format and the events raised to consumers.
//!
//! Control frames are small JSON objects:
//! `{"subscribe":["AAPL"]}`, `{"unsubscribe":["AAPL"]}`, `{"heartbeat":true}`.
//! Inbound frames carry either a numeric `price` (plus `symbol`, `change`,
//! `changePercent`, and optional `volume`/`marketCap`) or an `error` string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StreamError;

/// Outbound control frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlMessage {
    /// Start receiving updates for these symbols.
    Subscribe {
        /// Symbols to add.
        subscribe: Vec<String>,
    },
    /// Stop receiving updates for these symbols.
    Unsubscribe {
        /// Symbols to remove.
        unsubscribe: Vec<String>,
    },
    /// Keep-alive.
    Heartbeat {
        /// Always `true`.
        heartbeat: bool,
    },
}

impl ControlMessage {
    /// Subscribe frame.
    #[must_use]
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self::Subscribe { subscribe: symbols }
    }

    /// Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self::Unsubscribe { unsubscribe: symbols }
    }

    /// Keep-alive frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::Heartbeat { heartbeat: true }
    }

    /// Encodes the frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, StreamError> {
        serde_json::to_string(self).map_err(StreamError::Encode)
    }
}

/// A live price tick.
///
/// Missing numeric fields are zero rather than absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Symbol identifier.
    pub id: String,
    /// Last price.
    pub price: f64,
    /// Absolute change.
    pub change: f64,
    /// Percentage change.
    pub change_percent: f64,
    /// Traded volume, zero if not reported.
    pub volume: f64,
    /// Market capitalization, zero if not reported.
    pub market_cap: f64,
    /// When the frame was received.
    pub timestamp: DateTime<Utc>,
}

/// Events raised by the streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Handshake completed.
    Connect,
    /// The connection closed.
    Disconnect {
        /// Close code (1000 for a normal closure).
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A price tick arrived.
    Price(PriceUpdate),
    /// The server reported an error, or reconnection gave up.
    Error {
        /// Error description.
        message: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    #[serde(alias = "id")]
    symbol: Option<String>,
    price: Option<f64>,
    change: Option<f64>,
    change_percent: Option<f64>,
    volume: Option<f64>,
    market_cap: Option<f64>,
    error: Option<String>,
}

/// Decodes one inbound text frame.
///
/// Returns `Ok(None)` for well-formed frames that carry neither a priced
/// symbol nor an error.
///
/// # Errors
///
/// Returns the JSON error for unparseable frames.
pub fn decode_frame(text: &str, received_at: DateTime<Utc>) -> Result<Option<StreamEvent>, serde_json::Error> {
    let frame: InboundFrame = serde_json::from_str(text)?;

    if let Some(message) = frame.error {
        return Ok(Some(StreamEvent::Error { message }));
    }

    match (frame.symbol, frame.price) {
        (Some(id), Some(price)) if !id.is_empty() => Ok(Some(StreamEvent::Price(PriceUpdate {
            id,
            price,
            change: frame.change.unwrap_or_default(),
            change_percent: frame.change_percent.unwrap_or_default(),
            volume: frame.volume.unwrap_or_default(),
            market_cap: frame.market_cap.unwrap_or_default(),
            timestamp: received_at,
        }))),
        _ => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frames_encode_as_plain_objects() {
        assert_eq!(
            ControlMessage::subscribe(vec!["AAPL".into(), "MSFT".into()]).encode().unwrap(),
            r#"{"subscribe":["AAPL","MSFT"]}"#
        );
        assert_eq!(
            ControlMessage::unsubscribe(vec!["AAPL".into()]).encode().unwrap(),
            r#"{"unsubscribe":["AAPL"]}"#
        );
        assert_eq!(ControlMessage::heartbeat().encode().unwrap(), r#"{"heartbeat":true}"#);
    }

    #[test]
    fn test_price_frame_defaults_missing_numbers_to_zero() {
        let now = Utc::now();
        let event = decode_frame(r#"{"symbol":"AAPL","price":150.25}"#, now).unwrap();
        let Some(StreamEvent::Price(update)) = event else {
            panic!("expected price event, got {event:?}");
        };
        assert_eq!(update.id, "AAPL");
        assert!((update.price - 150.25).abs() < f64::EPSILON);
        assert!(update.change.abs() < f64::EPSILON);
        assert!(update.change_percent.abs() < f64::EPSILON);
        assert!(update.volume.abs() < f64::EPSILON);
        assert!(update.market_cap.abs() < f64::EPSILON);
        assert_eq!(update.timestamp, now);
    }

    #[test]
    fn test_price_frame_reads_all_fields() {
        let text = r#"{"symbol":"MSFT","price":410.5,"change":-2.5,"changePercent":-0.6,"volume":1200,"marketCap":3.1e12}"#;
        let Some(StreamEvent::Price(update)) = decode_frame(text, Utc::now()).unwrap() else {
            panic!("expected price event");
        };
        assert!((update.change + 2.5).abs() < f64::EPSILON);
        assert!((update.change_percent + 0.6).abs() < f64::EPSILON);
        assert!((update.volume - 1200.0).abs() < f64::EPSILON);
        assert!((update.market_cap - 3.1e12).abs() < 1.0);
    }

    #[test]
    fn test_error_frame() {
        assert_eq!(
            decode_frame(r#"{"error":"invalid symbol"}"#, Utc::now()).unwrap(),
            Some(StreamEvent::Error {
                message: "invalid symbol".to_string()
            })
        );
    }

    #[test]
    fn test_unrecognized_and_malformed_frames() {
        assert_eq!(decode_frame(r#"{"pong":true}"#, Utc::now()).unwrap(), None);
        assert_eq!(decode_frame(r#"{"price":1.0}"#, Utc::now()).unwrap(), None);
        assert!(decode_frame("not json", Utc::now()).is_err());
        assert!(decode_frame(r#"{"price":"high"}"#, Utc::now()).is_err());
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_value(StreamEvent::Disconnect {
            code: 1000,
            reason: "bye".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "disconnect");
        assert_eq!(json["data"]["code"], 1000);

        let connect = serde_json::to_string(&StreamEvent::Connect).unwrap();
        assert_eq!(connect, r#"{"type":"connect"}"#);
    }
}
