//! Pull-style consumption of stream events.
//!
//! [`AsyncBridge`] registers one handler on the [`EventHub`]. Each event is
//! handed to the oldest waiting consumer if there is one, otherwise queued
//! without bound. The sequence never ends on its own; dropping the bridge
//! unregisters the handler.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::Stream;
use tokio::sync::oneshot;

use super::StreamEvent;
use super::events::{EventHub, HandlerId};

#[derive(Debug, Default)]
struct BridgeState {
    queue: VecDeque<StreamEvent>,
    waiters: VecDeque<oneshot::Sender<StreamEvent>>,
}

fn lock(shared: &Mutex<BridgeState>) -> MutexGuard<'_, BridgeState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(shared: &Mutex<BridgeState>, mut event: StreamEvent) {
    let mut state = lock(shared);
    while let Some(waiter) = state.waiters.pop_front() {
        match waiter.send(event) {
            Ok(()) => return,
            // The waiter stopped waiting; try the next one.
            Err(returned) => event = returned,
        }
    }
    state.queue.push_back(event);
}

/// A registered waiter. Dropped before its event was read, it puts the event
/// back at the head of the queue.
struct Waiter<'a> {
    shared: &'a Mutex<BridgeState>,
    receiver: oneshot::Receiver<StreamEvent>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.receiver.close();
        if let Ok(event) = self.receiver.try_recv() {
            lock(self.shared).queue.push_front(event);
        }
    }
}

/// Awaitable, queue-backed view of a client's events.
#[derive(Debug)]
pub struct AsyncBridge {
    hub: Arc<EventHub>,
    handler: HandlerId,
    shared: Arc<Mutex<BridgeState>>,
}

impl AsyncBridge {
    /// Starts collecting events published on `hub`.
    #[must_use]
    pub fn new(hub: Arc<EventHub>) -> Self {
        let shared = Arc::new(Mutex::new(BridgeState::default()));
        let sink = Arc::clone(&shared);
        let handler = hub.on_event(move |event| deliver(&sink, event.clone()));
        Self { hub, handler, shared }
    }

    /// Waits for the next event.
    ///
    /// Dropping the future loses nothing: an event already handed to it goes
    /// back to the front of the queue.
    pub async fn next(&self) -> StreamEvent {
        loop {
            let mut waiter = {
                let mut state = lock(&self.shared);
                if let Some(event) = state.queue.pop_front() {
                    return event;
                }
                let (sender, receiver) = oneshot::channel();
                state.waiters.push_back(sender);
                Waiter {
                    shared: &self.shared,
                    receiver,
                }
            };
            if let Ok(event) = (&mut waiter.receiver).await {
                return event;
            }
        }
    }

    /// Takes the next queued event without waiting.
    #[must_use]
    pub fn try_next(&self) -> Option<StreamEvent> {
        lock(&self.shared).queue.pop_front()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.shared).queue.len()
    }

    /// Whether no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turns the bridge into an endless [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures_util::stream::unfold(self, |bridge| async move {
            let event = bridge.next().await;
            Some((event, bridge))
        })
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        self.hub.remove_handler(self.handler);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    fn error(message: &str) -> StreamEvent {
        StreamEvent::Error {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_queued_events_come_out_in_order() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));

        hub.publish(&StreamEvent::Connect);
        hub.publish(&error("a"));
        assert_eq!(bridge.len(), 2);

        assert_eq!(bridge.next().await, StreamEvent::Connect);
        assert_eq!(bridge.next().await, error("a"));
        assert!(bridge.is_empty());
        assert_eq!(bridge.try_next(), None);
    }

    #[test]
    fn test_waiting_consumer_receives_event_directly() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));

        let mut next = task::spawn(bridge.next());
        assert_pending!(next.poll());

        hub.publish(&error("direct"));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), error("direct"));
        assert!(bridge.is_empty(), "handed to the waiter, not queued");
    }

    #[test]
    fn test_oldest_waiter_is_served_first() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));

        let mut first = task::spawn(bridge.next());
        let mut second = task::spawn(bridge.next());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        hub.publish(&error("one"));
        hub.publish(&error("two"));
        assert_ready_eq!(first.poll(), error("one"));
        assert_ready_eq!(second.poll(), error("two"));
    }

    #[test]
    fn test_cancelled_waiter_does_not_lose_events() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));

        let mut abandoned = task::spawn(bridge.next());
        assert_pending!(abandoned.poll());
        drop(abandoned);

        hub.publish(&error("kept"));
        assert_eq!(bridge.try_next(), Some(error("kept")));
    }

    #[test]
    fn test_dropped_waiter_returns_handed_event_to_queue() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));

        let mut next = task::spawn(bridge.next());
        assert_pending!(next.poll());
        hub.publish(&error("handed-off"));
        hub.publish(&error("after"));
        drop(next);

        assert_eq!(bridge.try_next(), Some(error("handed-off")));
        assert_eq!(bridge.try_next(), Some(error("after")));
    }

    #[tokio::test]
    async fn test_timed_out_next_keeps_later_event() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), bridge.next()).await;
        assert!(timed_out.is_err());
        hub.publish(&StreamEvent::Connect);

        assert_eq!(bridge.next().await, StreamEvent::Connect);
    }

    #[tokio::test]
    async fn test_into_stream_yields_events() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));
        hub.publish(&StreamEvent::Connect);
        hub.publish(&error("x"));

        let events: Vec<StreamEvent> = bridge.into_stream().take(2).collect().await;
        assert_eq!(events, vec![StreamEvent::Connect, error("x")]);
    }

    #[test]
    fn test_drop_unregisters_handler() {
        let hub = Arc::new(EventHub::new());
        let bridge = AsyncBridge::new(Arc::clone(&hub));
        assert_eq!(hub.handler_count(), 1);
        drop(bridge);
        assert_eq!(hub.handler_count(), 0);
    }
}
