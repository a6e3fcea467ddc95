//! Long-lived quote streaming connection.
//!
//! [`StreamingClient`] owns the connection state, the subscription set, and
//! the background tasks (reader, heartbeat, reconnect timer). Everything it
//! observes goes out through one [`EventHub::publish`] call.
//!
//! Closures other than a normal closure (code 1000) schedule a reconnect
//! after `reconnect_interval * attempt`. A failed reconnect schedules the
//! next one by the same rule until `max_reconnect_attempts` is reached, at
//! which point an error event is raised instead.
//!
//! The subscription set outlives a closure only when a reconnect is
//! scheduled and `resubscribe_on_reconnect` is set; otherwise it is cleared,
//! so a later `subscribe` always reaches the server.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

use super::events::{EventHub, HandlerId};
use super::message::{ControlMessage, StreamEvent, decode_frame};
use super::{AsyncBridge, StreamError};
use crate::config::StreamConfig;

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Handshake complete.
    Connected,
}

#[derive(Debug)]
struct ClientState {
    connection: ConnectionState,
    subscriptions: BTreeSet<String>,
    reconnect_attempts: u32,
    /// Bumped whenever a connection is started or torn down by the client,
    /// so late close notifications from an old reader are ignored.
    generation: u64,
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl ClientState {
    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(handle) = self.reconnect_timer.take() {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: StreamConfig,
    hub: Arc<EventHub>,
    state: Mutex<ClientState>,
}

/// Streaming client handle. Clones share the same connection.
///
/// # Example
///
/// ```no_run
/// use yfwire::config::StreamConfig;
/// use yfwire::stream::{StreamEvent, StreamingClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = StreamingClient::new(StreamConfig::default())?;
/// client.on_event(|event| {
///     if let StreamEvent::Price(update) = event {
///         println!("{} {}", update.id, update.price);
///     }
/// });
/// client.connect().await?;
/// client.subscribe(&["AAPL", "MSFT"]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StreamingClient {
    inner: Arc<Inner>,
}

impl StreamingClient {
    /// Creates a disconnected client.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] when `config` does not validate.
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                hub: Arc::new(EventHub::new()),
                state: Mutex::new(ClientState {
                    connection: ConnectionState::Disconnected,
                    subscriptions: BTreeSet::new(),
                    reconnect_attempts: 0,
                    generation: 0,
                    sink: None,
                    reader: None,
                    heartbeat: None,
                    reconnect_timer: None,
                }),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Whether the handshake has completed and the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribed symbols, sorted.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.lock().subscriptions.iter().cloned().collect()
    }

    /// Reconnect attempts since the last successful handshake.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// The event hub all events are published on.
    #[must_use]
    pub fn events(&self) -> &Arc<EventHub> {
        &self.inner.hub
    }

    /// Registers a callback for every event.
    pub fn on_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner.hub.on_event(handler)
    }

    /// Unregisters a callback.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.hub.remove_handler(id)
    }

    /// Creates a pull-style consumer of this client's events.
    #[must_use]
    pub fn bridge(&self) -> AsyncBridge {
        AsyncBridge::new(Arc::clone(&self.inner.hub))
    }

    /// Opens the connection.
    ///
    /// Does nothing (with a warning) when already connected or connecting.
    /// On success the reconnect counter resets, the heartbeat starts, and a
    /// connect event is raised. Symbols kept from an unexpected closure are
    /// then re-sent in one subscribe frame.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Connect`] when the handshake fails,
    /// [`StreamError::ConnectTimeout`] when it exceeds the connection timeout,
    /// and [`StreamError::Cancelled`] when `disconnect` ran meanwhile.
    #[instrument(skip(self), fields(url = %self.inner.config.url))]
    pub async fn connect(&self) -> Result<(), StreamError> {
        let generation = {
            let mut state = self.lock();
            if state.connection != ConnectionState::Disconnected {
                warn!(state = ?state.connection, "connect called while not disconnected; ignoring");
                return Ok(());
            }
            state.cancel_reconnect();
            state.connection = ConnectionState::Connecting;
            state.generation += 1;
            state.generation
        };

        let url = self.inner.config.url.clone();
        let timeout = self.inner.config.connection_timeout;
        let handshake = tokio::time::timeout(timeout, connect_async(url.as_str())).await;
        let ws = match handshake {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(error)) => {
                self.abandon_connecting(generation);
                return Err(StreamError::connect(url, error));
            }
            Err(_) => {
                self.abandon_connecting(generation);
                return Err(StreamError::ConnectTimeout { url, timeout });
            }
        };

        let (sink, stream) = ws.split();
        let sink: WsSink = Arc::new(tokio::sync::Mutex::new(sink));
        let cancelled = {
            let mut state = self.lock();
            if state.generation == generation {
                state.connection = ConnectionState::Connected;
                state.reconnect_attempts = 0;
                state.sink = Some(Arc::clone(&sink));
                state.stop_heartbeat();
                state.heartbeat = Some(tokio::spawn(heartbeat_loop(
                    Arc::clone(&sink),
                    self.inner.config.heartbeat_interval,
                )));
            }
            state.generation != generation
        };
        if cancelled {
            close_sink(&sink).await;
            return Err(StreamError::Cancelled { url });
        }

        info!("stream connected");
        self.inner.hub.publish(&StreamEvent::Connect);

        // Reading starts only after the connect event is out.
        let reader = tokio::spawn(read_loop(self.clone(), stream, generation));
        {
            let mut state = self.lock();
            if state.generation == generation {
                state.reader = Some(reader);
            }
        }

        self.resubscribe().await;
        Ok(())
    }

    fn abandon_connecting(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.connection = ConnectionState::Disconnected;
        }
    }

    /// Closes the connection cleanly.
    ///
    /// Stops the heartbeat and any pending reconnect before returning; this is
    /// the only closure that never triggers a reconnect. Resolves immediately
    /// when not connected. The subscription set is cleared.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let (sink, reader) = {
            let mut state = self.lock();
            state.cancel_reconnect();
            match state.connection {
                ConnectionState::Connected => {}
                ConnectionState::Connecting => {
                    state.generation += 1;
                    state.connection = ConnectionState::Disconnected;
                    state.subscriptions.clear();
                    return;
                }
                ConnectionState::Disconnected => {
                    // Drops symbols kept for a reconnect that was just cancelled.
                    state.subscriptions.clear();
                    return;
                }
            }
            state.generation += 1;
            state.stop_heartbeat();
            (state.sink.take(), state.reader.take())
        };

        if let Some(sink) = sink {
            close_sink(&sink).await;
        }
        if let Some(mut reader) = reader {
            // The reader ends once the server acknowledges the close.
            if tokio::time::timeout(self.inner.config.connection_timeout, &mut reader)
                .await
                .is_err()
            {
                warn!("close acknowledgment timed out");
                reader.abort();
            }
        }

        {
            let mut state = self.lock();
            state.connection = ConnectionState::Disconnected;
            state.subscriptions.clear();
        }
        info!("stream disconnected");
        self.inner.hub.publish(&StreamEvent::Disconnect {
            code: NORMAL_CLOSURE,
            reason: "client disconnect".to_string(),
        });
    }

    /// Subscribes to symbols not already in the subscription set.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotConnected`] without a connection, or the
    /// send error if the control frame cannot be written.
    #[instrument(skip(self, symbols))]
    pub async fn subscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Result<(), StreamError> {
        // Symbols are reserved before sending so concurrent calls send each once.
        let (sink, added) = {
            let mut state = self.lock();
            let sink = connected_sink(&state)?;
            let mut added: Vec<String> = Vec::new();
            for symbol in symbols.iter().map(|s| s.as_ref().trim()) {
                if !symbol.is_empty() && state.subscriptions.insert(symbol.to_string()) {
                    added.push(symbol.to_string());
                }
            }
            (sink, added)
        };
        if added.is_empty() {
            return Ok(());
        }

        if let Err(error) = send_control(&sink, &ControlMessage::subscribe(added.clone())).await {
            let mut state = self.lock();
            for symbol in &added {
                state.subscriptions.remove(symbol);
            }
            return Err(error);
        }
        debug!(symbols = ?added, "subscribed");
        Ok(())
    }

    /// Unsubscribes from symbols currently in the subscription set.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotConnected`] without a connection, or the
    /// send error if the control frame cannot be written.
    #[instrument(skip(self, symbols))]
    pub async fn unsubscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Result<(), StreamError> {
        let (sink, removed) = {
            let mut state = self.lock();
            let sink = connected_sink(&state)?;
            let mut removed: Vec<String> = Vec::new();
            for symbol in symbols.iter().map(|s| s.as_ref().trim()) {
                if state.subscriptions.remove(symbol) {
                    removed.push(symbol.to_string());
                }
            }
            (sink, removed)
        };
        if removed.is_empty() {
            return Ok(());
        }

        if let Err(error) = send_control(&sink, &ControlMessage::unsubscribe(removed.clone())).await {
            self.lock().subscriptions.extend(removed);
            return Err(error);
        }
        debug!(symbols = ?removed, "unsubscribed");
        Ok(())
    }

    /// Decodes one inbound frame and publishes what it carries.
    ///
    /// Malformed frames are logged and dropped; this never fails and never
    /// touches the subscription set.
    pub fn handle_message(&self, text: &str) {
        match decode_frame(text, Utc::now()) {
            Ok(Some(event)) => self.inner.hub.publish(&event),
            Ok(None) => debug!("ignoring frame without price or error"),
            Err(error) => warn!(error = %error, "dropping malformed stream frame"),
        }
    }

    fn handle_closed(&self, generation: u64, code: u16, reason: String) {
        let reconnect = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.connection = ConnectionState::Disconnected;
            state.sink = None;
            state.reader = None;
            state.stop_heartbeat();
            let reconnect = self.inner.config.auto_reconnect && code != NORMAL_CLOSURE;
            // The set is only kept for a reconnect that will re-send it.
            if !reconnect || !self.inner.config.resubscribe_on_reconnect {
                state.subscriptions.clear();
            }
            reconnect
        };

        info!(code, reason = %reason, "stream closed");
        self.inner.hub.publish(&StreamEvent::Disconnect { code, reason });
        if reconnect {
            self.schedule_reconnect();
        }
    }

    /// Arms the reconnect timer, or raises an error event once the attempt
    /// cap is reached.
    fn schedule_reconnect(&self) {
        let max = self.inner.config.max_reconnect_attempts;
        let delay = {
            let mut state = self.lock();
            if state.reconnect_attempts >= max {
                state.subscriptions.clear();
                None
            } else {
                state.reconnect_attempts += 1;
                let attempt = state.reconnect_attempts;
                let delay = self.inner.config.reconnect_interval.saturating_mul(attempt);
                state.cancel_reconnect();
                let client = self.clone();
                state.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    client.reconnect().await;
                }));
                Some((attempt, delay))
            }
        };

        match delay {
            Some((attempt, delay)) => {
                info!(attempt, max_attempts = max, delay_ms = delay.as_millis(), "scheduling reconnect");
            }
            None => {
                warn!(max_attempts = max, "giving up on reconnecting");
                self.inner.hub.publish(&StreamEvent::Error {
                    message: format!("maximum reconnect attempts ({max}) reached"),
                });
            }
        }
    }

    async fn reconnect(&self) {
        // This task is the pending timer; forget its handle without aborting.
        drop(self.lock().reconnect_timer.take());

        match self.connect().await {
            Ok(()) | Err(StreamError::Cancelled { .. }) => {}
            Err(error) => {
                warn!(error = %error, "reconnect attempt failed");
                self.schedule_reconnect();
            }
        }
    }

    async fn resubscribe(&self) {
        if !self.inner.config.resubscribe_on_reconnect {
            return;
        }
        let (sink, symbols) = {
            let state = self.lock();
            let Ok(sink) = connected_sink(&state) else {
                return;
            };
            (sink, state.subscriptions.iter().cloned().collect::<Vec<_>>())
        };
        if symbols.is_empty() {
            return;
        }
        match send_control(&sink, &ControlMessage::subscribe(symbols.clone())).await {
            Ok(()) => info!(count = symbols.len(), "resubscribed after reconnect"),
            Err(error) => warn!(error = %error, "failed to resubscribe after reconnect"),
        }
    }
}

fn connected_sink(state: &ClientState) -> Result<WsSink, StreamError> {
    match (&state.connection, &state.sink) {
        (ConnectionState::Connected, Some(sink)) => Ok(Arc::clone(sink)),
        _ => Err(StreamError::NotConnected),
    }
}

async fn send_control(sink: &WsSink, message: &ControlMessage) -> Result<(), StreamError> {
    let text = message.encode()?;
    sink.lock()
        .await
        .send(Message::Text(text))
        .await
        .map_err(StreamError::send)
}

async fn close_sink(sink: &WsSink) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    };
    if let Err(error) = sink.lock().await.send(Message::Close(Some(frame))).await {
        debug!(error = %error, "close frame not sent");
    }
}

async fn read_loop(client: StreamingClient, mut stream: SplitStream<WsStream>, generation: u64) {
    let mut close: Option<(u16, String)> = None;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => client.handle_message(&text),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => client.handle_message(text),
                Err(_) => warn!(bytes = data.len(), "dropping non-UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                close = Some(frame.map_or((ABNORMAL_CLOSURE, String::new()), |f| {
                    (u16::from(f.code), f.reason.into_owned())
                }));
                // The close reply is already queued; dropping both halves ends the socket.
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => break,
            Err(error) => {
                warn!(error = %error, "stream read failed");
                break;
            }
        }
    }

    let (code, reason) = close.unwrap_or((ABNORMAL_CLOSURE, "connection lost".to_string()));
    client.handle_closed(generation, code, reason);
}

async fn heartbeat_loop(sink: WsSink, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(error) = send_control(&sink, &ControlMessage::heartbeat()).await {
            debug!(error = %error, "heartbeat failed; stopping");
            return;
        }
    }
}
