//! Stale-while-revalidate fetch client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use catalog_cache::{FileStorage, TtlCache};
use catalog_core::error::{FetchError, Result};
use catalog_core::traits::{Connectivity, Transport};
use catalog_core::types::{CacheCategory, DurationTable, QueueConfig, RetryTuning};
use catalog_queue::RateLimitedQueue;

use crate::config::FetchConfig;
use crate::connectivity::AlwaysOnline;
use crate::retry::fetch_with_retry;
use crate::transport::HttpTransport;

/// A network fetch that any number of callers can await.
type Flight = Shared<BoxFuture<'static, Result<Value>>>;

/// One resolve request.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Cache key
    pub key: String,
    /// Absolute http(s) URL
    pub url: String,
    /// Largest acceptable age of a cached value
    pub max_age: Duration,
    /// Retry tuning for the network path
    pub tuning: RetryTuning,
}

impl FetchRequest {
    /// Creates a request with the general retry tuning.
    pub fn new(key: impl Into<String>, url: impl Into<String>, max_age: Duration) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            max_age,
            tuning: RetryTuning::general(),
        }
    }

    /// Sets the retry tuning.
    pub fn with_tuning(mut self, tuning: RetryTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.tuning.max_attempts = max_attempts;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(FetchError::Config("cache key cannot be empty".into()));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| FetchError::Config(format!("invalid URL {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::Config(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        self.tuning.validate()
    }
}

/// Where a resolved value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Cached and within its max age
    Fresh,
    /// Cached; the host is offline so age was not considered
    Offline,
    /// Cached but past its max age; a background refresh was started
    Stale,
    /// Fetched from the network just now
    Network,
    /// Cached; every network attempt failed
    Fallback,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Source::Fresh => "fresh",
            Source::Offline => "offline",
            Source::Stale => "stale",
            Source::Network => "network",
            Source::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// A resolved value and its origin.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    /// The JSON payload
    pub data: Value,
    /// Where it came from
    pub source: Source,
}

impl Resolved {
    fn new(data: Value, source: Source) -> Self {
        Self { data, source }
    }
}

struct ClientInner {
    cache: Arc<TtlCache>,
    queue: RateLimitedQueue,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
    durations: DurationTable,
    general_tuning: RetryTuning,
    search_tuning: RetryTuning,
    in_flight: DashMap<String, Flight>,
}

/// Cache-first client for the upstream catalog API.
///
/// Resolves a request by:
/// 1. Returning a fresh cached value
/// 2. Returning any cached value while offline
/// 3. Returning a stale cached value and refreshing it in the background
/// 4. Fetching through the rate-limited queue, sharing the fetch with any
///    concurrent request for the same key
/// 5. Falling back to the cached value when every attempt fails
///
/// Cloning is cheap and clones share the cache, the queue and the in-flight
/// map, so one client per process keeps the dispatch ceiling global.
#[derive(Clone)]
pub struct FetchClient {
    inner: Arc<ClientInner>,
}

impl FetchClient {
    /// Starts building a client.
    pub fn builder() -> FetchClientBuilder {
        FetchClientBuilder::default()
    }

    /// Builds a client over HTTP from configuration.
    ///
    /// Opens the cache file if one is configured. Must be called from within
    /// a Tokio runtime.
    pub async fn from_config(config: &FetchConfig) -> Result<Self> {
        config.validate()?;

        let cache = match &config.cache_path {
            Some(path) => {
                TtlCache::open(Arc::new(FileStorage::new(path)), config.cache.clone()).await?
            }
            None => TtlCache::in_memory_with_config(config.cache.clone()),
        };
        let transport = HttpTransport::with_options(config.http_timeout(), &config.user_agent)?;

        info!(
            cache_path = ?config.cache_path,
            ceiling = config.queue.ceiling_per_second,
            "Fetch client ready"
        );

        Self::builder()
            .transport(transport)
            .cache(cache)
            .queue_config(config.queue.clone())
            .durations(config.durations.clone())
            .general_tuning(config.retry.clone())
            .search_tuning(config.search_retry.clone())
            .build()
    }

    /// Resolves `key` from `url`, accepting cached values up to `max_age` old.
    ///
    /// Uses the general retry tuning.
    pub async fn resolve(&self, key: &str, url: &str, max_age: Duration) -> Result<Value> {
        let request = FetchRequest::new(key, url, max_age).with_tuning(self.inner.general_tuning.clone());
        self.fetch(request).await
    }

    /// Resolves `key` using the max age and retry tuning of `category`.
    pub async fn resolve_category(&self, key: &str, url: &str, category: CacheCategory) -> Result<Value> {
        let request = self.request_for(key, url, category);
        self.fetch(request).await
    }

    /// Builds the request `resolve_category` would issue.
    pub fn request_for(&self, key: &str, url: &str, category: CacheCategory) -> FetchRequest {
        let tuning = match category {
            CacheCategory::Search | CacheCategory::Autocomplete => &self.inner.search_tuning,
            _ => &self.inner.general_tuning,
        };
        FetchRequest::new(key, url, self.inner.durations.max_age(category)).with_tuning(tuning.clone())
    }

    /// Resolves a request and returns only the payload.
    pub async fn fetch(&self, request: FetchRequest) -> Result<Value> {
        self.fetch_detailed(request).await.map(|resolved| resolved.data)
    }

    /// Resolves a request and reports where the value came from.
    #[instrument(skip(self, request), fields(key = %request.key))]
    pub async fn fetch_detailed(&self, request: FetchRequest) -> Result<Resolved> {
        request.validate()?;

        if let Some(entry) = self.inner.cache.get(&request.key) {
            if !entry.is_stale(request.max_age) {
                debug!("Fresh cache hit");
                return Ok(Resolved::new(entry.data, Source::Fresh));
            }

            if !self.inner.connectivity.is_online() {
                debug!("Offline, serving cached value regardless of age");
                return Ok(Resolved::new(entry.data, Source::Offline));
            }

            debug!(
                age_secs = entry.age_at(Utc::now()).as_secs(),
                "Stale cache hit, revalidating"
            );
            self.revalidate(&request);
            return Ok(Resolved::new(entry.data, Source::Stale));
        }

        if !self.inner.connectivity.is_online() {
            debug!("Offline with nothing cached, trying the network anyway");
        } else {
            debug!("Cache miss");
        }

        match self.join_or_start(&request).await {
            Ok(data) => Ok(Resolved::new(data, Source::Network)),
            Err(e) => match self.inner.cache.get(&request.key) {
                Some(entry) => {
                    warn!(error = %e, "Fetch failed, serving last cached value");
                    Ok(Resolved::new(entry.data, Source::Fallback))
                }
                None => Err(e),
            },
        }
    }

    /// Removes one cached entry.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        self.inner.cache.remove(key).await
    }

    /// Removes every cached entry and returns how many were removed.
    pub async fn clear_cache(&self) -> Result<usize> {
        self.inner.cache.clear().await
    }

    /// Returns the shared cache.
    pub fn cache(&self) -> &TtlCache {
        &self.inner.cache
    }

    /// Returns the category max-age table.
    pub fn durations(&self) -> &DurationTable {
        &self.inner.durations
    }

    /// Number of keys with a network fetch underway.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Number of queued or running network tasks.
    pub fn pending_requests(&self) -> usize {
        self.inner.queue.pending()
    }

    /// Starts a background refresh whose outcome is only logged.
    fn revalidate(&self, request: &FetchRequest) {
        let flight = self.join_or_start(request);
        let key = request.key.clone();

        tokio::spawn(async move {
            match flight.await {
                Ok(_) => debug!(key = %key, "Background revalidation refreshed entry"),
                Err(e) => warn!(key = %key, error = %e, "Background revalidation failed, keeping stale entry"),
            }
        });
    }

    /// Returns the in-flight fetch for the request's key, starting one if
    /// there is none.
    fn join_or_start(&self, request: &FetchRequest) -> Flight {
        match self.inner.in_flight.entry(request.key.clone()) {
            Entry::Occupied(existing) => {
                debug!(key = %request.key, "Joining in-flight fetch");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                // Queue now so dispatch order is call order, not spawn order.
                let transport = self.inner.transport.clone();
                let url = request.url.clone();
                let tuning = request.tuning.clone();
                let queued = self
                    .inner
                    .queue
                    .enqueue(move || async move { fetch_with_retry(transport.as_ref(), &url, &tuning).await });

                let handle = tokio::spawn(finish_flight(self.inner.clone(), request.key.clone(), queued));
                let flight = async move {
                    handle
                        .await
                        .unwrap_or_else(|e| Err(FetchError::Internal(format!("fetch task failed: {e}"))))
                }
                .boxed()
                .shared();
                slot.insert(flight.clone());
                flight
            }
        }
    }
}

/// Owns one queued network fetch: await it, write the cache, then leave the
/// in-flight map.
async fn finish_flight<F>(inner: Arc<ClientInner>, key: String, queued: F) -> Result<Value>
where
    F: std::future::Future<Output = Result<Value>>,
{
    let result = queued.await;

    if let Ok(data) = &result {
        if let Err(e) = inner.cache.set(&key, data.clone()).await {
            warn!(key = %key, error = %e, "Failed to persist fetched value");
        }
    }

    inner.in_flight.remove(&key);
    result
}

/// Builder for [`FetchClient`].
pub struct FetchClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    connectivity: Arc<dyn Connectivity>,
    cache: Option<Arc<TtlCache>>,
    queue: QueueConfig,
    durations: DurationTable,
    general_tuning: RetryTuning,
    search_tuning: RetryTuning,
}

impl Default for FetchClientBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            connectivity: Arc::new(AlwaysOnline),
            cache: None,
            queue: QueueConfig::default(),
            durations: DurationTable::default(),
            general_tuning: RetryTuning::general(),
            search_tuning: RetryTuning::search(),
        }
    }
}

impl FetchClientBuilder {
    /// Sets the transport. Required.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets a shared transport.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the connectivity signal. Defaults to always online.
    pub fn connectivity(mut self, connectivity: impl Connectivity + 'static) -> Self {
        self.connectivity = Arc::new(connectivity);
        self
    }

    /// Sets the cache. Defaults to an empty in-memory cache.
    pub fn cache(mut self, cache: TtlCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Sets the queue configuration.
    pub fn queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the dispatch ceiling.
    pub fn ceiling(mut self, ceiling_per_second: u32) -> Self {
        self.queue.ceiling_per_second = ceiling_per_second;
        self
    }

    /// Sets the category max-age table.
    pub fn durations(mut self, durations: DurationTable) -> Self {
        self.durations = durations;
        self
    }

    /// Sets the tuning for general lookups.
    pub fn general_tuning(mut self, tuning: RetryTuning) -> Self {
        self.general_tuning = tuning;
        self
    }

    /// Sets the tuning for search traffic.
    pub fn search_tuning(mut self, tuning: RetryTuning) -> Self {
        self.search_tuning = tuning;
        self
    }

    /// Builds the client and starts its queue worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<FetchClient> {
        let transport = self
            .transport
            .ok_or_else(|| FetchError::Config("a transport is required".into()))?;
        self.general_tuning.validate()?;
        self.search_tuning.validate()?;

        let queue = RateLimitedQueue::new(self.queue)?;
        let cache = self.cache.unwrap_or_else(|| Arc::new(TtlCache::in_memory()));

        Ok(FetchClient {
            inner: Arc::new(ClientInner {
                cache,
                queue,
                transport,
                connectivity: self.connectivity,
                durations: self.durations,
                general_tuning: self.general_tuning,
                search_tuning: self.search_tuning,
                in_flight: DashMap::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use catalog_cache::MemoryStorage;
    use catalog_core::traits::TransportError;
    use catalog_core::types::CacheEntry;
    use chrono::SubsecRound;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    use crate::connectivity::ConnectivityFlag;

    const URL: &str = "https://api.test/v4/top/anime?page=1";
    const HOUR: Duration = Duration::from_secs(3600);

    type Reply = std::result::Result<Value, TransportError>;

    /// Scripted transport: plays replies in order, repeating the last one,
    /// and records when each call was made.
    #[derive(Clone)]
    struct Stub {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        calls: Arc<AtomicUsize>,
        call_times: Arc<Mutex<Vec<Instant>>>,
        urls: Arc<Mutex<Vec<String>>>,
        latency: Duration,
    }

    impl Stub {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                calls: Arc::new(AtomicUsize::new(0)),
                call_times: Arc::new(Mutex::new(Vec::new())),
                urls: Arc::new(Mutex::new(Vec::new())),
                latency: Duration::ZERO,
            }
        }

        fn ok(value: Value) -> Self {
            Self::new(vec![Ok(value)])
        }

        fn failing(status: u16) -> Self {
            Self::new(vec![Err(TransportError::Status(status))])
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Stub {
        async fn get_json(&self, url: &str) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().push(Instant::now());
            self.urls.lock().push(url.to_string());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let mut replies = self.replies.lock();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
    }

    fn quick_tuning() -> RetryTuning {
        RetryTuning::general().with_jitter(Duration::ZERO)
    }

    fn client(stub: &Stub) -> FetchClient {
        FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .general_tuning(quick_tuning())
            .build()
            .unwrap()
    }

    async fn client_with_entry(stub: &Stub, entry: CacheEntry, connectivity: ConnectivityFlag) -> FetchClient {
        let cache = TtlCache::in_memory();
        cache.insert_entry(entry).await.unwrap();
        FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .connectivity(connectivity)
            .cache(cache)
            .general_tuning(quick_tuning())
            .build()
            .unwrap()
    }

    fn entry_aged(key: &str, data: Value, age: Duration) -> CacheEntry {
        let written_at = (Utc::now() - chrono::Duration::from_std(age).unwrap()).trunc_subsecs(3);
        CacheEntry::written_at(key, data, written_at)
    }

    /// Lets spawned tasks run to completion under the paused clock.
    async fn settle() {
        tokio::time::sleep(Duration::from_secs(120)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_fetches_and_caches() {
        let stub = Stub::ok(json!({"data": [1]}));
        let client = client(&stub);

        let resolved = client
            .fetch_detailed(FetchRequest::new("top:1", URL, HOUR))
            .await
            .unwrap();

        assert_eq!(resolved, Resolved::new(json!({"data": [1]}), Source::Network));
        assert_eq!(client.cache().get("top:1").unwrap().data, json!({"data": [1]}));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_skips_network() {
        let stub = Stub::ok(json!("new"));
        let client = client_with_entry(
            &stub,
            entry_aged("top:1", json!("cached"), Duration::from_secs(60)),
            ConnectivityFlag::new(true),
        )
        .await;

        let value = client.resolve("top:1", URL, HOUR).await.unwrap();
        assert_eq!(value, json!("cached"));

        settle().await;
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_serves_then_revalidates() {
        let stub = Stub::ok(json!("new")).with_latency(Duration::from_secs(5));
        let client = client_with_entry(
            &stub,
            entry_aged("top:1", json!("old"), Duration::from_secs(2 * 3600)),
            ConnectivityFlag::new(true),
        )
        .await;
        let started = Instant::now();

        let resolved = client
            .fetch_detailed(FetchRequest::new("top:1", URL, HOUR))
            .await
            .unwrap();
        // Served without waiting on the slow refresh
        assert_eq!(Instant::now(), started);
        assert_eq!(resolved, Resolved::new(json!("old"), Source::Stale));
        assert_eq!(client.cache().get("top:1").unwrap().data, json!("old"));

        settle().await;
        assert_eq!(stub.calls(), 1);
        let refreshed = client.cache().get("top:1").unwrap();
        assert_eq!(refreshed.data, json!("new"));
        assert!(!refreshed.is_stale(HOUR));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_revalidation_keeps_stale_entry() {
        let stub = Stub::failing(503);
        let stale = entry_aged("top:1", json!("old"), Duration::from_secs(2 * 3600));
        let written_at = stale.written_at;
        let client = client_with_entry(&stub, stale, ConnectivityFlag::new(true)).await;

        assert_eq!(client.resolve("top:1", URL, HOUR).await.unwrap(), json!("old"));

        settle().await;
        assert_eq!(stub.calls(), 3);
        let entry = client.cache().get("top:1").unwrap();
        assert_eq!(entry.data, json!("old"));
        assert_eq!(entry.written_at, written_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_serves_any_entry() {
        let stub = Stub::ok(json!("new"));
        let client = client_with_entry(
            &stub,
            entry_aged("top:1", json!("ancient"), Duration::from_secs(90 * 86_400)),
            ConnectivityFlag::new(false),
        )
        .await;

        let resolved = client
            .fetch_detailed(FetchRequest::new("top:1", URL, HOUR))
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::new(json!("ancient"), Source::Offline));

        settle().await;
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_without_entry_tries_network() {
        let stub = Stub::ok(json!("fetched"));
        let cache = TtlCache::in_memory();
        let client = FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .connectivity(ConnectivityFlag::new(false))
            .cache(cache)
            .build()
            .unwrap();

        assert_eq!(client.resolve("k", URL, HOUR).await.unwrap(), json!("fetched"));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_flip_is_observed() {
        let stub = Stub::ok(json!("new"));
        let flag = ConnectivityFlag::new(false);
        let client = client_with_entry(
            &stub,
            entry_aged("k", json!("old"), Duration::from_secs(2 * 3600)),
            flag.clone(),
        )
        .await;

        let offline = client.fetch_detailed(FetchRequest::new("k", URL, HOUR)).await.unwrap();
        assert_eq!(offline.source, Source::Offline);

        flag.set_online(true);
        let online = client.fetch_detailed(FetchRequest::new("k", URL, HOUR)).await.unwrap();
        assert_eq!(online.source, Source::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_ceiling_across_concurrent_misses() {
        let stub = Stub::ok(json!(true));
        let client = FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .ceiling(3)
            .build()
            .unwrap();

        let requests = (0..10).map(|i| {
            let client = client.clone();
            async move { client.resolve(&format!("item:{i}"), URL, HOUR).await }
        });
        let results = futures::future::join_all(requests).await;

        assert!(results.iter().all(|r| r.is_ok()));
        let times = stub.call_times.lock().clone();
        assert_eq!(times.len(), 10);
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .filter(|t| t.duration_since(*start) < Duration::from_secs(1))
                .count();
            assert!(in_window <= 3, "{in_window} dispatches within one second");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispatch_follows_call_order_from_spawned_task() {
        let stub = Stub::ok(json!(true));
        let client = FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .ceiling(10)
            .build()
            .unwrap();

        let issuer = client.clone();
        let results = tokio::spawn(async move {
            let requests = (0..6).map(|i| {
                let client = issuer.clone();
                async move { client.resolve(&format!("item:{i}"), &format!("{URL}&item={i}"), HOUR).await }
            });
            futures::future::join_all(requests).await
        })
        .await
        .unwrap();

        assert!(results.iter().all(|r| r.is_ok()));
        let expected: Vec<String> = (0..6).map(|i| format!("{URL}&item={i}")).collect();
        assert_eq!(*stub.urls.lock(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_never_fails_fast() {
        let stub = Stub::new(vec![
            Err(TransportError::Status(429)),
            Err(TransportError::Status(429)),
            Ok(json!({"ok": true})),
        ]);
        let client = client(&stub);

        let value = client
            .fetch(FetchRequest::new("k", URL, HOUR).with_tuning(quick_tuning().with_max_attempts(3)))
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_waits_out_backoff() {
        let stub = Stub::new(vec![Err(TransportError::Status(429)), Ok(json!(1))]);
        let client = client(&stub);
        let started = Instant::now();

        client.resolve("k", URL, HOUR).await.unwrap();

        let times = stub.call_times.lock().clone();
        assert_eq!(times.len(), 2);
        assert!(times[1].duration_since(started) >= RetryTuning::general().base());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_falls_back_to_cache() {
        let stub = Stub::failing(500);
        let client = client(&stub);

        // Seed the entry while the fetch is running, so the miss path is taken.
        let seed = {
            let cache_client = client.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cache_client.cache().set("k", json!("last good")).await.unwrap();
            }
        };
        let (resolved, _) = tokio::join!(
            client.fetch_detailed(FetchRequest::new("k", URL, HOUR)),
            seed
        );

        let resolved = resolved.unwrap();
        assert_eq!(resolved, Resolved::new(json!("last good"), Source::Fallback));
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_without_cache_errors() {
        let stub = Stub::failing(503);
        let client = client(&stub);

        let err = client.resolve("k", URL, HOUR).await.unwrap_err();
        assert!(matches!(err, FetchError::MaxRetriesExceeded { attempts: 3, .. }));
        assert_eq!(err.upstream_status(), Some(503));
        assert_eq!(stub.calls(), 3);
        assert!(client.cache().get("k").is_none());
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let stub = Stub::ok(json!({"shared": true})).with_latency(Duration::from_millis(200));
        let client = client(&stub);

        let (a, b) = tokio::join!(
            client.resolve("k", URL, HOUR),
            client.resolve("k", URL, HOUR)
        );

        assert_eq!(a.unwrap(), json!({"shared": true}));
        assert_eq!(b.unwrap(), json!({"shared": true}));
        assert_eq!(stub.calls(), 1);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_shares_failure() {
        let stub = Stub::failing(502).with_latency(Duration::from_millis(50));
        let client = client(&stub);

        let (a, b) = tokio::join!(
            client.resolve("k", URL, HOUR),
            client.resolve("k", URL, HOUR)
        );

        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_share() {
        let stub = Stub::ok(json!(1)).with_latency(Duration::from_millis(50));
        let client = client(&stub);

        let (a, b) = tokio::join!(
            client.resolve("a", URL, HOUR),
            client.resolve("b", URL, HOUR)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_overwrites_entry() {
        let stub = Stub::ok(json!("second"));
        let first = entry_aged("k", json!("first"), Duration::from_secs(2 * 3600));
        let client = client_with_entry(&stub, first.clone(), ConnectivityFlag::new(true)).await;

        client.resolve("k", URL, HOUR).await.unwrap();
        settle().await;

        let second = client.cache().get("k").unwrap();
        assert_eq!(second.data, json!("second"));
        assert!(second.written_at > first.written_at);
        assert_eq!(client.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_still_returns_value() {
        struct BrokenStorage;

        #[async_trait]
        impl catalog_core::traits::Storage for BrokenStorage {
            async fn load(&self) -> Result<std::collections::HashMap<String, String>> {
                Ok(Default::default())
            }
            async fn save(&self, _items: &std::collections::HashMap<String, String>) -> Result<()> {
                Err(FetchError::Storage("disk full".into()))
            }
        }

        let stub = Stub::ok(json!("value"));
        let cache = TtlCache::open(Arc::new(BrokenStorage), Default::default()).await.unwrap();
        let client = FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .cache(cache)
            .build()
            .unwrap();

        assert_eq!(client.resolve("k", URL, HOUR).await.unwrap(), json!("value"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_entry_is_a_miss() {
        let storage = MemoryStorage::with_items(
            [("catalog-cache:k".to_string(), "{broken".to_string())].into_iter().collect(),
        );
        let cache = TtlCache::open(Arc::new(storage), Default::default()).await.unwrap();
        let stub = Stub::ok(json!("repaired"));
        let client = FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .cache(cache)
            .build()
            .unwrap();

        let resolved = client.fetch_detailed(FetchRequest::new("k", URL, HOUR)).await.unwrap();
        assert_eq!(resolved.source, Source::Network);
        assert_eq!(client.cache().get("k").unwrap().data, json!("repaired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_category_uses_table() {
        let stub = Stub::ok(json!("new"));
        let durations = DurationTable::default().with_max_age(CacheCategory::TopList, Duration::from_secs(30));
        let cache = TtlCache::in_memory();
        cache
            .insert_entry(entry_aged("top", json!("cached"), Duration::from_secs(60)))
            .await
            .unwrap();
        let client = FetchClient::builder()
            .shared_transport(Arc::new(stub.clone()))
            .cache(cache)
            .durations(durations)
            .build()
            .unwrap();

        // 60s old entry is stale under a 30s top-list max age.
        let value = client.resolve_category("top", URL, CacheCategory::TopList).await.unwrap();
        assert_eq!(value, json!("cached"));
        settle().await;
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_for_picks_tuning() {
        let client = client(&Stub::ok(Value::Null));
        assert_eq!(
            client.request_for("s", URL, CacheCategory::Search).tuning,
            RetryTuning::search()
        );
        assert_eq!(
            client.request_for("d", URL, CacheCategory::ItemDetail).max_age,
            DurationTable::default().max_age(CacheCategory::ItemDetail)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_clear() {
        let stub = Stub::ok(json!(1));
        let client = client(&stub);
        client.resolve("a", URL, HOUR).await.unwrap();
        client.resolve("b", URL, HOUR).await.unwrap();

        assert!(client.invalidate("a").await.unwrap());
        assert!(!client.invalidate("a").await.unwrap());
        assert_eq!(client.clear_cache().await.unwrap(), 1);
        assert!(client.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_requests_rejected() {
        let stub = Stub::ok(json!(1));
        let client = client(&stub);

        for request in [
            FetchRequest::new("", URL, HOUR),
            FetchRequest::new("k", "not a url", HOUR),
            FetchRequest::new("k", "ftp://api.test/x", HOUR),
            FetchRequest::new("k", URL, HOUR).with_max_attempts(0),
        ] {
            assert!(matches!(client.fetch(request).await, Err(FetchError::Config(_))));
        }
        assert_eq!(stub.calls(), 0);
    }

    #[test]
    fn test_builder_requires_transport() {
        tokio_test::block_on(async {
            assert!(matches!(FetchClient::builder().build(), Err(FetchError::Config(_))));
        });
    }

    #[tokio::test]
    async fn test_from_config_with_file_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let config = FetchConfig::default().with_cache_path(&path);

        let client = FetchClient::from_config(&config).await.unwrap();
        client.cache().set("k", json!(1)).await.unwrap();
        assert!(path.exists());

        let reopened = FetchClient::from_config(&config).await.unwrap();
        assert_eq!(reopened.cache().get("k").unwrap().data, json!(1));
    }
}
