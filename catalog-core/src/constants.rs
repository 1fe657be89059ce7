//! Tuning constants for the catalog fetch layer.
//!
//! Defaults mirror the upstream catalog API contract: a single global
//! per-second request ceiling and two retry tunings for different traffic.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// RATE LIMITING
// ═══════════════════════════════════════════════════════════════════════════════

/// Upstream requests-per-second ceiling shared by all callers.
pub const DEFAULT_CEILING_PER_SECOND: u32 = 3;

/// Length of one fixed rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Extra wait added when a full window must roll over.
pub const DEFAULT_WINDOW_BUFFER: Duration = Duration::from_millis(50);

// ═══════════════════════════════════════════════════════════════════════════════
// RETRY / BACKOFF
// ═══════════════════════════════════════════════════════════════════════════════

/// Attempts per request, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for general lookups.
pub const GENERAL_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Delay cap for general lookups.
pub const GENERAL_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Base delay for search traffic, which the upstream throttles harder.
pub const SEARCH_BACKOFF_BASE: Duration = Duration::from_secs(4);

/// Delay cap for search traffic.
pub const SEARCH_BACKOFF_CAP: Duration = Duration::from_secs(20);

/// Upper bound of the random jitter added to every backoff.
pub const DEFAULT_BACKOFF_JITTER: Duration = Duration::from_secs(1);

/// HTTP status the upstream uses to signal throttling.
pub const HTTP_TOO_MANY_REQUESTS: u16 = 429;

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE MAX AGES
// ═══════════════════════════════════════════════════════════════════════════════

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Max age for top lists.
pub const TTL_TOP_LIST: Duration = Duration::from_secs(DAY);

/// Max age for seasonal lists.
pub const TTL_SEASONAL: Duration = Duration::from_secs(12 * HOUR);

/// Max age for a single item's detail page.
pub const TTL_ITEM_DETAIL: Duration = Duration::from_secs(7 * DAY);

/// Max age for search results.
pub const TTL_SEARCH: Duration = Duration::from_secs(HOUR);

/// Max age for genre and other taxonomy lists.
pub const TTL_TAXONOMY: Duration = Duration::from_secs(30 * DAY);

/// Max age for autocomplete suggestions.
pub const TTL_AUTOCOMPLETE: Duration = Duration::from_secs(MINUTE);

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Key prefix separating cache entries from unrelated persisted state.
pub const CACHE_NAMESPACE: &str = "catalog-cache:";

/// Default HTTP timeout for a single attempt, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// User agent sent to the upstream API.
pub const DEFAULT_USER_AGENT: &str = concat!("catalog-fetch/", env!("CARGO_PKG_VERSION"));
