//! Fetch client configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use catalog_cache::CacheConfig;
use catalog_core::constants::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use catalog_core::error::{FetchError, Result};
use catalog_core::types::{CacheCategory, DurationTable, QueueConfig, RetryTuning};

/// Everything needed to build a [`FetchClient`](crate::FetchClient).
///
/// # Example (TOML)
///
/// ```toml
/// cache_path = "/var/cache/catalog/cache.json"
/// http_timeout_seconds = 10
///
/// [queue]
/// ceiling_per_second = 2
///
/// [durations]
/// search_secs = 600
///
/// [search_retry]
/// max_attempts = 5
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Cache file. `None` keeps the cache in memory only.
    pub cache_path: Option<PathBuf>,
    /// Per-request HTTP timeout in seconds
    pub http_timeout_seconds: u64,
    /// User agent sent upstream
    pub user_agent: String,
    /// Cache namespace and bound
    pub cache: CacheConfig,
    /// Dispatch ceiling
    pub queue: QueueConfig,
    /// Max age per category
    pub durations: DurationTable,
    /// Retry tuning for general lookups
    pub retry: RetryTuning,
    /// Retry tuning for search traffic
    pub search_retry: RetryTuning,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            http_timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.into(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            durations: DurationTable::default(),
            retry: RetryTuning::general(),
            search_retry: RetryTuning::search(),
        }
    }
}

impl FetchConfig {
    /// Loads `.env` if present, then applies `CATALOG_*` environment variables
    /// on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Applies `CATALOG_*` variables resolved through `lookup`.
    ///
    /// Recognised variables:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `CATALOG_CACHE_PATH` | `cache_path` |
    /// | `CATALOG_CACHE_MAX_ENTRIES` | `cache.max_entries` |
    /// | `CATALOG_CEILING_PER_SECOND` | `queue.ceiling_per_second` |
    /// | `CATALOG_HTTP_TIMEOUT_SECS` | `http_timeout_seconds` |
    /// | `CATALOG_MAX_ATTEMPTS` | `retry.max_attempts`, `search_retry.max_attempts` |
    /// | `CATALOG_USER_AGENT` | `user_agent` |
    /// | `CATALOG_TTL_<CATEGORY>_SECS` | `durations`, e.g. `CATALOG_TTL_TOP_LIST_SECS` |
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("CATALOG_CACHE_PATH").filter(|p| !p.is_empty()) {
            config.cache_path = Some(PathBuf::from(path));
        }
        if let Some(max_entries) = parse_var(&lookup, "CATALOG_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = Some(max_entries);
        }
        if let Some(ceiling) = parse_var(&lookup, "CATALOG_CEILING_PER_SECOND")? {
            config.queue.ceiling_per_second = ceiling;
        }
        if let Some(timeout) = parse_var(&lookup, "CATALOG_HTTP_TIMEOUT_SECS")? {
            config.http_timeout_seconds = timeout;
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "CATALOG_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
            config.search_retry.max_attempts = attempts;
        }
        if let Some(user_agent) = lookup("CATALOG_USER_AGENT").filter(|ua| !ua.is_empty()) {
            config.user_agent = user_agent;
        }

        for category in CacheCategory::ALL {
            let name = ttl_var(category);
            if let Some(secs) = parse_var(&lookup, &name)? {
                config.durations = config.durations.with_max_age(category, Duration::from_secs(secs));
            }
        }

        config.validate()?;
        debug!(cache_path = ?config.cache_path, ceiling = config.queue.ceiling_per_second, "Loaded config from environment");
        Ok(config)
    }

    /// Reads a TOML config file. Missing fields keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parses TOML config text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| FetchError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the cache file.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Sets the dispatch ceiling.
    pub fn with_ceiling(mut self, ceiling_per_second: u32) -> Self {
        self.queue.ceiling_per_second = ceiling_per_second;
        self
    }

    /// Returns the HTTP timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.queue.validate()?;
        self.retry.validate()?;
        self.search_retry.validate()?;
        if self.http_timeout_seconds == 0 {
            return Err(FetchError::Config("http_timeout_seconds must be positive".into()));
        }
        Ok(())
    }
}

fn ttl_var(category: CacheCategory) -> String {
    format!(
        "CATALOG_TTL_{}_SECS",
        category.as_str().to_ascii_uppercase().replace('-', "_")
    )
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| FetchError::Config(format!("{name}: {e}"))),
    }
}
