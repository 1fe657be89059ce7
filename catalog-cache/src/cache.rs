//! Persisted TTL cache for upstream responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use catalog_core::constants::CACHE_NAMESPACE;
use catalog_core::error::{FetchError, Result};
use catalog_core::traits::Storage;
use catalog_core::types::CacheEntry;

use crate::storage::MemoryStorage;

/// Persisted blob layout: `{"data": ..., "writtenAt": <unix millis>}`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    written_at: DateTime<Utc>,
}

/// Cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Storage key prefix for cache entries
    pub namespace: String,
    /// Optional bound on the number of entries, at least 1. `None` keeps
    /// everything.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: CACHE_NAMESPACE.into(),
            max_entries: None,
        }
    }
}

impl CacheConfig {
    /// Sets the storage key prefix.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Bounds the cache to `max_entries`, evicting the oldest writes first.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Rejects a zero bound, which could not hold the entry being written.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == Some(0) {
            return Err(FetchError::Config("max_entries must be at least 1".into()));
        }
        Ok(())
    }
}

/// Persisted, timestamped key/value cache.
///
/// Thread-safe. All reads are served from memory; every mutation rewrites
/// the backing storage. The storage may hold unrelated keys: they are loaded,
/// carried along and saved back untouched.
pub struct TtlCache {
    /// Every storage item, namespaced or not
    items: RwLock<HashMap<String, String>>,
    storage: Arc<dyn Storage>,
    config: CacheConfig,
    /// Serializes snapshot + save so the newest snapshot is written last
    persist_lock: tokio::sync::Mutex<()>,
}

impl TtlCache {
    /// Opens a cache over `storage`, loading whatever it already holds.
    #[instrument(skip(storage, config), fields(namespace = %config.namespace))]
    pub async fn open(storage: Arc<dyn Storage>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let items = storage.load().await?;
        let cache = Self {
            items: RwLock::new(items),
            storage,
            config,
            persist_lock: tokio::sync::Mutex::new(()),
        };
        debug!(entries = cache.len(), "Cache opened");
        Ok(cache)
    }

    /// Creates an empty cache that persists nothing.
    pub fn in_memory() -> Self {
        Self::in_memory_with_config(CacheConfig::default())
    }

    /// Creates an empty in-memory cache with custom configuration.
    ///
    /// The configuration is not checked; see [`CacheConfig::validate`].
    pub fn in_memory_with_config(config: CacheConfig) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            storage: Arc::new(MemoryStorage::new()),
            config,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the key prefix used in storage.
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Gets an entry. Corrupt entries read as absent.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let items = self.items.read();
        let raw = items.get(&self.storage_key(key))?;
        match decode(key, raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key, error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Returns true if the entry is absent or older than `max_age`.
    pub fn is_stale(&self, key: &str, max_age: Duration) -> bool {
        self.get(key).map_or(true, |entry| entry.is_stale(max_age))
    }

    /// Stores `data` under `key`, replacing any previous entry.
    ///
    /// The memory copy is updated even if persisting fails; the error is
    /// returned so the caller can decide whether to log it.
    pub async fn set(&self, key: &str, data: Value) -> Result<CacheEntry> {
        let now = Utc::now().trunc_subsecs(3);
        let entry = self.write_entry(CacheEntry::written_at(key, data, now))?;
        self.persist().await?;
        Ok(entry)
    }

    /// Stores a full entry, keeping its own write time.
    ///
    /// Used for imports and seeding. The write time never moves backwards for a
    /// key: an entry older than the stored one is stamped with the stored time.
    pub async fn insert_entry(&self, entry: CacheEntry) -> Result<CacheEntry> {
        let entry = self.write_entry(entry)?;
        self.persist().await?;
        Ok(entry)
    }

    /// Removes an entry. Returns true if one existed.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let removed = self.items.write().remove(&self.storage_key(key)).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Removes every namespaced entry. Returns how many were dropped.
    pub async fn clear(&self) -> Result<usize> {
        let removed = {
            let mut items = self.items.write();
            let before = items.len();
            items.retain(|k, _| !k.starts_with(&self.config.namespace));
            before - items.len()
        };
        debug!(removed, "Cache cleared");
        self.persist().await?;
        Ok(removed)
    }

    /// Returns the number of namespaced entries, corrupt ones included.
    pub fn len(&self) -> usize {
        self.items
            .read()
            .keys()
            .filter(|k| k.starts_with(&self.config.namespace))
            .count()
    }

    /// Returns true if there are no namespaced entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cache keys (without prefix), sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .items
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(self.config.namespace.as_str()))
            .map(str::to_string)
            .collect();
        keys.sort();
        keys
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let items = self.items.read();
        let mut total = 0;
        let mut corrupt = 0;
        for (k, raw) in items.iter() {
            if let Some(key) = k.strip_prefix(self.config.namespace.as_str()) {
                total += 1;
                if decode(key, raw).is_err() {
                    corrupt += 1;
                }
            }
        }
        CacheStats {
            total_entries: total,
            corrupt_entries: corrupt,
            capacity: self.config.max_entries,
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.config.namespace, key)
    }

    /// Writes an entry in memory, enforcing monotonic write times and the
    /// optional capacity bound.
    fn write_entry(&self, mut entry: CacheEntry) -> Result<CacheEntry> {
        // Stored at millisecond precision; keep the returned entry identical.
        entry.written_at = entry.written_at.trunc_subsecs(3);
        let storage_key = self.storage_key(&entry.key);
        let mut items = self.items.write();

        if let Some(previous) = items.get(&storage_key).and_then(|raw| decode(&entry.key, raw).ok()) {
            if previous.written_at > entry.written_at {
                entry.written_at = previous.written_at;
            }
        }

        let raw = serde_json::to_string(&StoredEntry {
            data: entry.data.clone(),
            written_at: entry.written_at,
        })?;

        if let Some(max_entries) = self.config.max_entries {
            if !items.contains_key(&storage_key) {
                self.evict_for_insert(&mut items, max_entries);
            }
        }

        items.insert(storage_key, raw);
        Ok(entry)
    }

    /// Makes room for one more entry: corrupt entries go first, then the
    /// oldest writes.
    fn evict_for_insert(&self, items: &mut HashMap<String, String>, max_entries: usize) {
        let namespace = self.config.namespace.as_str();
        let mut ours: Vec<(String, Option<DateTime<Utc>>)> = items
            .iter()
            .filter_map(|(k, raw)| {
                let key = k.strip_prefix(namespace)?;
                Some((k.clone(), decode(key, raw).ok().map(|e| e.written_at)))
            })
            .collect();

        if ours.len() < max_entries {
            return;
        }

        // None (corrupt) sorts before any timestamp.
        ours.sort_by(|a, b| a.1.cmp(&b.1));
        let excess = ours.len() + 1 - max_entries;
        for (storage_key, _) in ours.into_iter().take(excess) {
            debug!(key = %storage_key, "Evicting cache entry");
            items.remove(&storage_key);
        }
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.items.read().clone();
        self.storage.save(&snapshot).await
    }
}

fn decode(key: &str, raw: &str) -> Result<CacheEntry> {
    let stored: StoredEntry = serde_json::from_str(raw).map_err(|e| FetchError::CacheCorrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(CacheEntry::written_at(key, stored.data, stored.written_at))
}

/// Cache statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheStats {
    /// Namespaced entries, corrupt ones included
    pub total_entries: usize,
    /// Entries whose blob cannot be parsed
    pub corrupt_entries: usize,
    /// Configured bound, if any
    pub capacity: Option<usize>,
}
