//! Fixed-window dispatch pacing.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use catalog_core::constants::RATE_WINDOW;

/// Dispatch counter for the current one-second window.
///
/// Owned by the queue's drain worker and never shared, so it needs no lock.
/// This is a plain fixed window, not a token bucket: up to `2 * ceiling`
/// dispatches can land close together around a window boundary.
///
/// The window counts task starts, not transport attempts. Retries inside a
/// running task are not counted, so a retrying task plus the tasks admitted
/// into the next window can put more than `ceiling` requests within one
/// second.
#[derive(Debug)]
pub(crate) struct RateWindow {
    count: u32,
    window_start: Option<Instant>,
    ceiling: u32,
    buffer: Duration,
}

impl RateWindow {
    pub(crate) fn new(ceiling: u32, buffer: Duration) -> Self {
        Self {
            count: 0,
            window_start: None,
            ceiling,
            buffer,
        }
    }

    /// Counts a dispatch at `now` if the window has room.
    ///
    /// Returns the wait needed otherwise; state is left untouched in that
    /// case and the caller must [`restart`](Self::restart) after waiting.
    pub(crate) fn reserve(&mut self, now: Instant) -> Option<Duration> {
        let Some(start) = self.window_start else {
            self.restart(now);
            return None;
        };

        let elapsed = now.saturating_duration_since(start);
        if elapsed >= RATE_WINDOW {
            self.restart(now);
            return None;
        }

        if self.count >= self.ceiling {
            return Some(RATE_WINDOW - elapsed + self.buffer);
        }

        self.count += 1;
        None
    }

    /// Opens a new window at `now` holding one dispatch.
    pub(crate) fn restart(&mut self, now: Instant) {
        self.window_start = Some(now);
        self.count = 1;
    }

    /// Waits until a dispatch is allowed and counts it.
    pub(crate) async fn admit(&mut self) {
        if let Some(wait) = self.reserve(Instant::now()) {
            debug!(
                wait_ms = wait.as_millis() as u64,
                ceiling = self.ceiling,
                "Rate window full, waiting for rollover"
            );
            sleep(wait).await;
            self.restart(Instant::now());
        }
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> u32 {
        self.count
    }
}
