//! # Catalog Core
//!
//! Core types, errors, and traits for the catalog fetch layer.
//!
//! This crate provides the building blocks shared by the cache, queue and
//! fetch crates:
//!
//! - **Types**: Cache entries, the duration table, retry and queue tuning
//! - **Errors**: The fetch error taxonomy
//! - **Constants**: Default ceilings, backoff tunings and max ages
//! - **Traits**: Collaborator seams (transport, connectivity, storage)
//!
//! ## Example
//!
//! ```rust
//! use catalog_core::{CacheCategory, DurationTable};
//! use std::time::Duration;
//!
//! let table = DurationTable::default();
//! assert_eq!(table.max_age(CacheCategory::Search), Duration::from_secs(3600));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{FetchError, Result};
pub use traits::*;
pub use types::*;
