//! # Catalog Fetch
//!
//! The single entry point UI code uses to read from the upstream catalog API.
//!
//! A [`FetchClient`] answers "data for key K, valid for duration D" by:
//!
//! 1. Serving a fresh cached value with no network activity
//! 2. Serving any cached value when the host is offline
//! 3. Serving a stale value immediately and revalidating it in the background
//! 4. Otherwise fetching through the global rate-limited queue, with retries,
//!    and falling back to the last good cached value if every attempt fails
//!
//! Concurrent requests for the same key share one network fetch.
//!
//! ## Example
//!
//! ```rust,ignore
//! use catalog_fetch::{FetchClient, FetchConfig};
//! use catalog_core::CacheCategory;
//!
//! let client = FetchClient::from_config(&FetchConfig::from_env()?).await?;
//! let top = client
//!     .resolve_category("top:anime:1", "https://api.example.com/v4/top/anime?page=1", CacheCategory::TopList)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod client;
mod config;
mod connectivity;
mod retry;
mod transport;

pub use client::{FetchClient, FetchClientBuilder, FetchRequest, Resolved, Source};
pub use config::FetchConfig;
pub use connectivity::{AlwaysOnline, ConnectivityFlag};
pub use retry::{backoff, decide, fetch_with_retry, AttemptOutcome};
pub use transport::HttpTransport;

pub use catalog_cache::{CacheConfig, TtlCache};
pub use catalog_core::{CacheCategory, DurationTable, FetchError, QueueConfig, RetryTuning};
