//! # Catalog Cache
//!
//! Persisted TTL cache for upstream catalog responses.
//!
//! Entries are timestamped JSON blobs stored under a namespaced key prefix.
//! Staleness is evaluated lazily against a caller-supplied max age; nothing is
//! swept in the background.
//!
//! Two storage backends are provided:
//!
//! - **Memory**: Nothing survives the process, for tests and one-shot tools
//! - **File**: A JSON document on disk, rewritten atomically on every change
//!
//! ## Example
//!
//! ```rust,ignore
//! use catalog_cache::{CacheConfig, FileStorage, TtlCache};
//!
//! let storage = Arc::new(FileStorage::new("cache.json"));
//! let cache = TtlCache::open(storage, CacheConfig::default()).await?;
//!
//! cache.set("top:anime:1", json!({"data": []})).await?;
//! assert!(!cache.is_stale("top:anime:1", Duration::from_secs(60)));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod cache;
mod storage;

pub use cache::{CacheConfig, CacheStats, TtlCache};
pub use storage::{FileStorage, MemoryStorage};

// Re-export the trait from core
pub use catalog_core::traits::Storage;
