//! Domain types for the catalog fetch layer.
//!
//! - [`CacheEntry`]: A cached JSON payload and the time it was written
//! - [`CacheCategory`] / [`DurationTable`]: Semantic category → max age
//! - [`RetryTuning`]: Per-call-site backoff and attempt budget
//! - [`QueueConfig`]: Global request ceiling for the rate-limited queue

mod entry;
mod durations;
mod tuning;

pub use entry::*;
pub use durations::*;
pub use tuning::*;
