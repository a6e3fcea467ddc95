//! Fixed pre-call pacing for outbound requests.
//!
//! Every outbound call waits [`Pacer::delay`] first, independent of retry
//! state, keeping the aggregate request rate under a ceiling without a full
//! token-bucket limiter.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use yfwire::transport::Pacer;
//!
//! # async fn example() {
//! let pacer = Pacer::new(Duration::from_millis(100));
//! pacer.pace().await; // sleeps 100ms
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative pacing delay (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Inserts a fixed delay before each outbound call.
///
/// `Pacer` is `Send + Sync` and shared by the transport and the
/// authentication flows through the session.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,

    /// Total time spent pacing (milliseconds).
    cumulative_delay_ms: AtomicU64,

    /// Set once the cumulative warning has been emitted.
    warned: AtomicBool,
}

impl Pacer {
    /// Creates a pacer with the given fixed delay. A zero delay disables pacing.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            cumulative_delay_ms: AtomicU64::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Creates a pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.delay.is_zero()
    }

    /// Returns the fixed delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Total time spent pacing so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::Relaxed))
    }

    /// Waits the fixed delay before an outbound call.
    #[instrument(level = "trace", skip(self), fields(delay_ms = self.delay.as_millis()))]
    pub async fn pace(&self) {
        if self.is_disabled() {
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = self.delay.as_millis() as u64;
        let cumulative =
            Duration::from_millis(self.cumulative_delay_ms.fetch_add(delay_ms, Ordering::Relaxed) + delay_ms);

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD && !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                cumulative_delay_secs = cumulative.as_secs(),
                "request pacing has added significant delay - consider reducing request volume"
            );
        }

        debug!(delay_ms, "pacing outbound request");
        tokio::time::sleep(self.delay).await;
    }
}
