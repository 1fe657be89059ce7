//! # Catalog Queue
//!
//! Global request queue for the upstream catalog API.
//!
//! Every outbound request, whatever module it comes from, goes through one
//! [`RateLimitedQueue`]. A single drain worker runs tasks strictly in
//! submission order and paces dispatches with a fixed one-second window so the
//! upstream's requests-per-second ceiling holds across all callers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use catalog_queue::RateLimitedQueue;
//!
//! let queue = RateLimitedQueue::new(QueueConfig::with_ceiling(3))?;
//! let value = queue.enqueue(|| async { Ok(json!({"ok": true})) }).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod queue;
mod window;

pub use queue::RateLimitedQueue;
