//! Retry and queue tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKOFF_JITTER, DEFAULT_CEILING_PER_SECOND, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_WINDOW_BUFFER, GENERAL_BACKOFF_BASE, GENERAL_BACKOFF_CAP, SEARCH_BACKOFF_BASE,
    SEARCH_BACKOFF_CAP,
};
use crate::error::{FetchError, Result};

/// Backoff and attempt budget for one call site.
///
/// Different call sites need different tunings because the upstream throttles
/// search traffic harder than plain lookups; see [`RetryTuning::general`] and
/// [`RetryTuning::search`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryTuning {
    /// Delay before the first retry, in milliseconds
    pub base_ms: u64,
    /// Largest exponential delay, in milliseconds (jitter comes on top)
    pub cap_ms: u64,
    /// Upper bound of the random jitter, in milliseconds
    pub jitter_ms: u64,
    /// Attempts per request, including the first
    pub max_attempts: u32,
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self::general()
    }
}

impl RetryTuning {
    /// Tuning for general lookups (1s base, 10s cap).
    pub fn general() -> Self {
        Self {
            base_ms: millis(GENERAL_BACKOFF_BASE),
            cap_ms: millis(GENERAL_BACKOFF_CAP),
            jitter_ms: millis(DEFAULT_BACKOFF_JITTER),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Tuning for high-volume search traffic (4s base, 20s cap).
    pub fn search() -> Self {
        Self {
            base_ms: millis(SEARCH_BACKOFF_BASE),
            cap_ms: millis(SEARCH_BACKOFF_CAP),
            ..Self::general()
        }
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets base and cap.
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.base_ms = millis(base);
        self.cap_ms = millis(cap);
        self
    }

    /// Sets the jitter bound.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = millis(jitter);
        self
    }

    /// Base delay.
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    /// Delay cap.
    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    /// Jitter bound.
    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    /// Deterministic part of the backoff: `min(base * 2^attempt, cap)`.
    ///
    /// `attempt` is the zero-based index of the attempt that just failed.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }

    /// Validates the tuning.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FetchError::Config("max_attempts must be at least 1".into()));
        }
        if self.base_ms > self.cap_ms {
            return Err(FetchError::Config(format!(
                "backoff base ({}ms) exceeds cap ({}ms)",
                self.base_ms, self.cap_ms
            )));
        }
        Ok(())
    }
}

/// Configuration of the global rate-limited queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Requests allowed per one-second window
    pub ceiling_per_second: u32,
    /// Extra wait when a full window must roll over, in milliseconds
    pub window_buffer_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ceiling_per_second: DEFAULT_CEILING_PER_SECOND,
            window_buffer_ms: millis(DEFAULT_WINDOW_BUFFER),
        }
    }
}

impl QueueConfig {
    /// Creates a config with the given ceiling and the default buffer.
    pub fn with_ceiling(ceiling_per_second: u32) -> Self {
        Self {
            ceiling_per_second,
            ..Default::default()
        }
    }

    /// Window rollover buffer.
    pub fn window_buffer(&self) -> Duration {
        Duration::from_millis(self.window_buffer_ms)
    }

    /// Validates the config.
    pub fn validate(&self) -> Result<()> {
        if self.ceiling_per_second == 0 {
            return Err(FetchError::Config("ceiling_per_second must be at least 1".into()));
        }
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
