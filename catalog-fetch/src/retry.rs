//! Per-request retry loop with exponential backoff and jitter.
//!
//! Each attempt's result goes through [`decide`], which returns an explicit
//! outcome; [`fetch_with_retry`] only acts on that outcome.

use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::time::sleep;
use tracing::debug;

use catalog_core::error::{FetchError, Result};
use catalog_core::traits::{Transport, TransportError};
use catalog_core::types::RetryTuning;

/// What to do after one attempt.
#[derive(Debug, PartialEq)]
pub enum AttemptOutcome {
    /// The attempt succeeded.
    Success(Value),
    /// Wait, then try again.
    Retry(Duration),
    /// Stop and report.
    Fail(FetchError),
}

/// Backoff before the attempt after `attempt` (zero-based):
/// `min(base * 2^attempt, cap) + uniform(0..=jitter)`.
pub fn backoff<R: Rng + ?Sized>(tuning: &RetryTuning, attempt: u32, rng: &mut R) -> Duration {
    let jitter_ms = if tuning.jitter_ms == 0 {
        0
    } else {
        rng.gen_range(0..=tuning.jitter_ms)
    };
    tuning.exponential_delay(attempt) + Duration::from_millis(jitter_ms)
}

/// Decides what follows attempt number `attempt` (zero-based).
///
/// Every failure, 429 included, consumes an attempt and backs off while the
/// budget lasts. Nothing fails fast.
pub fn decide<R: Rng + ?Sized>(
    result: std::result::Result<Value, TransportError>,
    attempt: u32,
    tuning: &RetryTuning,
    rng: &mut R,
) -> AttemptOutcome {
    let error = match result {
        Ok(value) => return AttemptOutcome::Success(value),
        Err(e) => FetchError::from(e),
    };

    let attempts = attempt + 1;
    if attempts >= tuning.max_attempts.max(1) {
        return AttemptOutcome::Fail(FetchError::MaxRetriesExceeded {
            attempts,
            last: Box::new(error),
        });
    }

    AttemptOutcome::Retry(backoff(tuning, attempt, rng))
}

/// Runs GET attempts against `url` until one succeeds or the budget is spent.
///
/// This is the body of a queued task: the caller owns the cache write.
pub async fn fetch_with_retry(
    transport: &dyn Transport,
    url: &str,
    tuning: &RetryTuning,
) -> Result<Value> {
    let mut attempt = 0;

    loop {
        let result = transport.get_json(url).await;
        let failure = result.as_ref().err().cloned();
        let outcome = decide(result, attempt, tuning, &mut rand::thread_rng());

        match outcome {
            AttemptOutcome::Success(value) => return Ok(value),
            AttemptOutcome::Retry(delay) => {
                debug!(
                    url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = ?failure,
                    "Retrying after backoff"
                );
                sleep(delay).await;
                attempt += 1;
            }
            AttemptOutcome::Fail(error) => {
                debug!(url, error = %error, "Giving up");
                return Err(error);
            }
        }
    }
}
