//! Typed cache facade over the configured tiers.
//!
//! Every operation returns a [`Deferred`] whose work runs on a tokio worker.
//! Each call first goes to the remote tier; if that tier reports
//! [`CacheError::ConnectionUnavailable`] the same call is retried on the file
//! tier. The choice is made per call, so a remote outage degrades to the
//! file tier and recovers on its own when the remote comes back.
//!
//! ## TTLs
//!
//! Writes take `Option<Duration>`: `None` applies the configured default TTL,
//! `Some(Duration::ZERO)` stores without expiry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec;
use crate::command::{Batch, Command, Reply};
use crate::config::CacheSettings;
use crate::deferred::Deferred;
use crate::error::{CacheError, CacheResult};
use crate::file::FileStore;
use crate::metrics;
use crate::remote::RemoteStore;
use crate::store::{CacheStore, TimeToLive};
use crate::tier::Tier;

type StoreFuture<T> = BoxFuture<'static, CacheResult<T>>;

struct CacheInner {
    remote: Option<Arc<dyn CacheStore>>,
    file: Option<Arc<dyn CacheStore>>,
    default_ttl: Option<Duration>,
}

/// Cheaply cloneable handle to the cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
    pinned: Option<Tier>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("tiers", &self.configured_tiers())
            .field("pinned", &self.pinned)
            .field("default_ttl", &self.inner.default_ttl)
            .finish()
    }
}

/// Assembles a [`Cache`] from explicit stores.
#[derive(Default)]
pub struct CacheBuilder {
    remote: Option<Arc<dyn CacheStore>>,
    file: Option<Arc<dyn CacheStore>>,
    default_ttl: Option<Duration>,
}

impl CacheBuilder {
    pub fn remote(mut self, store: impl CacheStore + 'static) -> Self {
        self.remote = Some(Arc::new(store));
        self
    }

    pub fn file(mut self, store: impl CacheStore + 'static) -> Self {
        self.file = Some(Arc::new(store));
        self
    }

    /// TTL for writes that do not pass one. Zero means no expiry.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl).filter(|t| !t.is_zero());
        self
    }

    pub fn build(self) -> CacheResult<Cache> {
        if self.remote.is_none() && self.file.is_none() {
            return Err(CacheError::config("at least one cache tier is required"));
        }
        Ok(Cache {
            inner: Arc::new(CacheInner {
                remote: self.remote,
                file: self.file,
                default_ttl: self.default_ttl,
            }),
            pinned: None,
        })
    }
}

impl Cache {
    pub fn builder() -> CacheBuilder {
        CacheBuilder::default()
    }

    /// Build the tiers enabled in `settings`.
    ///
    /// An unreachable remote tier does not fail here; calls fall back to the
    /// file tier until it answers.
    pub fn from_settings(settings: &CacheSettings) -> CacheResult<Self> {
        settings.validate().map_err(CacheError::config)?;

        let mut builder = Self::builder();
        if let Some(ttl) = settings.default_ttl() {
            builder = builder.default_ttl(ttl);
        }
        if settings.remote.enabled {
            builder = builder.remote(RemoteStore::connect(
                &settings.remote,
                settings.remote_keyspace(),
            )?);
        }
        if settings.file.enabled {
            builder = builder.file(FileStore::from_config(
                &settings.file,
                settings.file_keyspace(),
            ));
        }
        let cache = builder.build()?;
        tracing::info!(
            tiers = ?cache.configured_tiers(),
            default_ttl_secs = settings.default_ttl_secs,
            "cache initialized"
        );
        Ok(cache)
    }

    /// A handle whose operations only touch `tier`, with no fallback.
    pub fn tier(&self, tier: Tier) -> Cache {
        Cache {
            inner: Arc::clone(&self.inner),
            pinned: Some(tier),
        }
    }

    pub fn pinned_tier(&self) -> Option<Tier> {
        self.pinned
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.inner.default_ttl
    }

    fn store(&self, tier: Tier) -> Option<&Arc<dyn CacheStore>> {
        match tier {
            Tier::Remote => self.inner.remote.as_ref(),
            Tier::File => self.inner.file.as_ref(),
        }
    }

    fn require(&self, tier: Tier) -> CacheResult<Arc<dyn CacheStore>> {
        self.store(tier)
            .cloned()
            .ok_or_else(|| CacheError::unavailable(tier, "tier is not configured"))
    }

    /// Stores to try, in preference order.
    fn candidates(&self) -> CacheResult<Vec<Arc<dyn CacheStore>>> {
        match self.pinned {
            Some(tier) => self.require(tier).map(|store| vec![store]),
            None => Ok(Tier::ALL
                .iter()
                .filter_map(|tier| self.store(*tier).cloned())
                .collect()),
        }
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.inner.default_ttl)
    }

    fn dispatch<T, F>(&self, operation: &'static str, op: F) -> Deferred<T>
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<dyn CacheStore>) -> StoreFuture<T> + Send + 'static,
    {
        match self.candidates() {
            Ok(stores) => Deferred::spawn(routed(operation, stores, op)),
            Err(e) => Deferred::rejected(e),
        }
    }

    // ---------------------------------------------------------------------
    // Single-key operations
    // ---------------------------------------------------------------------

    /// The stored value, or `None` when absent or expired.
    pub fn get<T>(&self, key: impl Into<String>) -> Deferred<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let key = key.into();
        self.dispatch("get", move |store| {
            let key = key.clone();
            async move {
                let bytes = store.get(&key).await?;
                metrics::record_lookup(store.tier(), bytes.is_some());
                tracing::trace!(tier = %store.tier(), key = %key, hit = bytes.is_some(), "cache get");
                bytes.map(|b| codec::decode(&b)).transpose()
            }
            .boxed()
        })
    }

    pub fn set<T>(&self, key: impl Into<String>, value: &T, ttl: Option<Duration>) -> Deferred<bool>
    where
        T: Serialize + ?Sized,
    {
        let value = match codec::encode(value) {
            Ok(value) => value,
            Err(e) => return Deferred::rejected(e),
        };
        let key = key.into();
        let ttl = self.effective_ttl(ttl);
        self.dispatch("set", move |store| {
            let (key, value) = (key.clone(), value.clone());
            async move { store.set(&key, value, ttl).await }.boxed()
        })
    }

    /// Store only if `key` is absent. Resolves to whether it stored.
    pub fn add<T>(&self, key: impl Into<String>, value: &T, ttl: Option<Duration>) -> Deferred<bool>
    where
        T: Serialize + ?Sized,
    {
        let value = match codec::encode(value) {
            Ok(value) => value,
            Err(e) => return Deferred::rejected(e),
        };
        let key = key.into();
        let ttl = self.effective_ttl(ttl);
        self.dispatch("add", move |store| {
            let (key, value) = (key.clone(), value.clone());
            async move { store.add(&key, value, ttl).await }.boxed()
        })
    }

    /// Resolves to `true` iff an entry was removed.
    pub fn delete(&self, key: impl Into<String>) -> Deferred<bool> {
        let key = key.into();
        self.dispatch("delete", move |store| {
            let key = key.clone();
            async move { store.delete(&key).await }.boxed()
        })
    }

    pub fn ttl(&self, key: impl Into<String>) -> Deferred<TimeToLive> {
        let key = key.into();
        self.dispatch("ttl", move |store| {
            let key = key.clone();
            async move { store.ttl(&key).await }.boxed()
        })
    }

    /// Set (`Some`) or clear (`None` or zero) the expiry of an existing entry.
    pub fn expire(&self, key: impl Into<String>, ttl: Option<Duration>) -> Deferred<bool> {
        let key = key.into();
        self.dispatch("expire", move |store| {
            let key = key.clone();
            async move { store.expire(&key, ttl).await }.boxed()
        })
    }

    // ---------------------------------------------------------------------
    // Counters
    // ---------------------------------------------------------------------

    /// Atomically add `delta`, creating the counter at zero (no expiry) when
    /// absent. Resolves to the new value.
    pub fn increment(&self, key: impl Into<String>, delta: i64) -> Deferred<i64> {
        let key = key.into();
        self.dispatch("increment", move |store| {
            let key = key.clone();
            async move { store.increment(&key, delta).await }.boxed()
        })
    }

    /// Current value of a counter written by [`increment`](Self::increment)
    /// or [`open_counter`](Self::open_counter).
    pub fn counter(&self, key: impl Into<String>) -> Deferred<Option<i64>> {
        let key = key.into();
        self.dispatch("counter", move |store| {
            let key = key.clone();
            async move {
                match store.get(&key).await? {
                    Some(bytes) => codec::decode_counter(&bytes).map(Some),
                    None => Ok(None),
                }
            }
            .boxed()
        })
    }

    /// Create a counter at `initial` with `ttl`, only if absent.
    pub fn open_counter(
        &self,
        key: impl Into<String>,
        initial: i64,
        ttl: Option<Duration>,
    ) -> Deferred<bool> {
        let key = key.into();
        let value = codec::encode_counter(initial);
        let ttl = self.effective_ttl(ttl);
        self.dispatch("open_counter", move |store| {
            let (key, value) = (key.clone(), value.clone());
            async move { store.add(&key, value, ttl).await }.boxed()
        })
    }

    // ---------------------------------------------------------------------
    // Multi-key operations
    // ---------------------------------------------------------------------

    /// Every requested key mapped to its value, or `None` when missing.
    pub fn multi_get<T, I, K>(&self, keys: I) -> Deferred<HashMap<String, Option<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.dispatch("multi_get", move |store| {
            let keys = keys.clone();
            async move {
                let mut values = store.get_many(&keys).await?.into_iter();
                let mut found = HashMap::with_capacity(keys.len());
                for key in keys {
                    let bytes = values.next().flatten();
                    metrics::record_lookup(store.tier(), bytes.is_some());
                    let value = bytes.map(|b| codec::decode(&b)).transpose()?;
                    found.insert(key, value);
                }
                Ok(found)
            }
            .boxed()
        })
    }

    /// Write every item in one batched round trip. Resolves to `true` only if
    /// every write succeeded.
    pub fn multi_set<I, K, V>(&self, items: I, ttl: Option<Duration>) -> Deferred<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let items = match items
            .into_iter()
            .map(|(k, v)| Ok((k.into(), codec::encode(&v)?)))
            .collect::<CacheResult<Vec<(String, Vec<u8>)>>>()
        {
            Ok(items) => items,
            Err(e) => return Deferred::rejected(e),
        };
        let ttl = self.effective_ttl(ttl);
        self.dispatch("multi_set", move |store| {
            let items = items.clone();
            async move { store.set_many(items, ttl).await }.boxed()
        })
    }

    /// Number of `keys` currently present.
    pub fn exists<I, K>(&self, keys: I) -> Deferred<u64>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.dispatch("exists", move |store| {
            let keys = keys.clone();
            async move { store.exists(&keys).await }.boxed()
        })
    }

    // ---------------------------------------------------------------------
    // Batches
    // ---------------------------------------------------------------------

    /// Send `commands` together, without atomicity across them.
    pub fn pipeline(&self, commands: Vec<Command>) -> Deferred<Vec<Reply>> {
        self.execute(Batch::pipeline(commands))
    }

    /// Run `commands` as one atomic unit.
    pub fn transaction(&self, commands: Vec<Command>) -> Deferred<Vec<Reply>> {
        self.execute(Batch::transaction(commands))
    }

    pub fn execute(&self, batch: Batch) -> Deferred<Vec<Reply>> {
        let batch = Arc::new(batch);
        self.dispatch(batch.mode().as_str(), move |store| {
            let batch = Arc::clone(&batch);
            async move { store.execute(&batch).await }.boxed()
        })
    }

    // ---------------------------------------------------------------------
    // Get-or-compute
    // ---------------------------------------------------------------------

    /// The cached value for `key`, or the output of `producer`, which is then
    /// stored with `ttl`. A failed store is logged and does not fail the call.
    pub fn remember<T, F, Fut>(&self, key: impl Into<String>, ttl: Option<Duration>, producer: F) -> Deferred<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let cache = self.clone();
        let key = key.into();
        Deferred::spawn(async move {
            if let Some(value) = cache.get::<T>(key.clone()).await? {
                return Ok(value);
            }
            let value = producer().await?;
            if let Err(e) = cache.set(key.clone(), &value, ttl).await {
                tracing::warn!(key = %key, error = %e, "failed to store computed value");
            }
            Ok(value)
        })
    }

    // ---------------------------------------------------------------------
    // Tier management
    // ---------------------------------------------------------------------

    /// Every tier name the cache recognizes, configured or not.
    pub fn valid_tiers(&self) -> BTreeSet<Tier> {
        Tier::ALL.into_iter().collect()
    }

    /// Tiers with a store behind them in this cache.
    pub fn configured_tiers(&self) -> Vec<Tier> {
        Tier::ALL
            .into_iter()
            .filter(|tier| self.store(*tier).is_some())
            .collect()
    }

    /// Tiers whole-tier operations act on: the pinned tier, or every
    /// configured one.
    fn scope(&self) -> Vec<Tier> {
        match self.pinned {
            Some(tier) => vec![tier],
            None => self.configured_tiers(),
        }
    }

    /// Configured tiers that can serve requests right now.
    pub async fn available_tiers(&self) -> BTreeSet<Tier> {
        let mut available = BTreeSet::new();
        for tier in self.configured_tiers() {
            let Some(store) = self.store(tier) else {
                continue;
            };
            if store.is_available().await {
                available.insert(tier);
            }
        }
        available
    }

    /// Remove every entry in `tier`'s keyspace. Other tiers are untouched.
    pub async fn clear_tier(&self, tier: Tier) -> CacheResult<u64> {
        let removed = self.require(tier)?.clear().await?;
        tracing::debug!(tier = %tier, removed, "cache tier cleared");
        Ok(removed)
    }

    /// Clear every tier in scope.
    ///
    /// Each tier is attempted even when an earlier one fails; the first
    /// failure is returned once all have run.
    pub async fn clear_all(&self) -> CacheResult<BTreeMap<Tier, u64>> {
        let mut outcomes = Vec::new();
        for tier in self.scope() {
            outcomes.push((tier, self.clear_tier(tier).await));
        }
        collect_tier_outcomes("clear_all", outcomes)
    }

    /// Remove expired entries from tiers that do not expire natively.
    ///
    /// Like [`Cache::clear_all`], every tier in scope is attempted.
    pub async fn cleanup(&self) -> CacheResult<BTreeMap<Tier, u64>> {
        let mut outcomes = Vec::new();
        for tier in self.scope() {
            let swept = match self.require(tier) {
                Ok(store) => store.sweep().await,
                Err(e) => Err(e),
            };
            if let Ok(removed) = swept {
                tracing::debug!(tier = %tier, removed, "expired entries swept");
            }
            outcomes.push((tier, swept));
        }
        collect_tier_outcomes("cleanup", outcomes)
    }
}

fn collect_tier_outcomes(
    operation: &'static str,
    outcomes: Vec<(Tier, CacheResult<u64>)>,
) -> CacheResult<BTreeMap<Tier, u64>> {
    let mut removed = BTreeMap::new();
    let mut first_error = None;
    for (tier, outcome) in outcomes {
        match outcome {
            Ok(count) => {
                removed.insert(tier, count);
            }
            Err(e) => {
                tracing::warn!(operation, tier = %tier, error = %e, "cache tier maintenance failed");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}

/// Run `op` on each store in turn until one is reachable.
async fn routed<T, F>(operation: &'static str, stores: Vec<Arc<dyn CacheStore>>, op: F) -> CacheResult<T>
where
    F: Fn(Arc<dyn CacheStore>) -> StoreFuture<T>,
{
    let mut stores = stores.into_iter().peekable();
    while let Some(store) = stores.next() {
        match op(Arc::clone(&store)).await {
            Err(e) if e.is_unavailable() => {
                let Some(next) = stores.peek() else {
                    return Err(e);
                };
                tracing::warn!(
                    operation,
                    from = %store.tier(),
                    to = %next.tier(),
                    error = %e,
                    "cache tier unavailable, falling back"
                );
                metrics::record_fallback(store.tier(), next.tier());
            }
            outcome => return outcome,
        }
    }
    Err(CacheError::config("no cache tier is configured"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::key::Keyspace;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Page {
        path: String,
        body: String,
    }

    fn unreachable_remote() -> RemoteStore {
        let config = crate::config::RemoteTierConfig {
            port: 1,
            timeout_ms: 200,
            ..Default::default()
        };
        RemoteStore::connect(&config, Keyspace::new("test:")).unwrap()
    }

    fn file_store(dir: &TempDir, clock: Arc<ManualClock>) -> FileStore {
        FileStore::new(dir.path(), Keyspace::new("test:")).with_clock(clock)
    }

    fn file_only(dir: &TempDir) -> (Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Cache::builder()
            .file(file_store(dir, clock.clone()))
            .default_ttl(Duration::from_secs(60))
            .build()
            .unwrap();
        (cache, clock)
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = file_only(&dir);
        let page = Page {
            path: "/home".into(),
            body: "<h1>hi</h1>".into(),
        };

        assert!(cache.set("page", &page, None).await.unwrap());
        assert_eq!(cache.get::<Page>("page").await.unwrap(), Some(page));
        assert_eq!(cache.get::<Page>("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn default_ttl_applies_when_none_given() {
        let dir = TempDir::new().unwrap();
        let (cache, clock) = file_only(&dir);

        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, Some(Duration::ZERO)).await.unwrap();
        assert_eq!(
            cache.ttl("a").await.unwrap(),
            TimeToLive::Expires(Duration::from_secs(60))
        );
        assert_eq!(cache.ttl("b").await.unwrap(), TimeToLive::Persistent);

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get::<i32>("a").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("b").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn multi_get_maps_every_key() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = file_only(&dir);

        assert!(cache
            .multi_set([("x", 1), ("y", 2)], None)
            .await
            .unwrap());
        let found = cache.multi_get::<i32, _, _>(["y", "x", "z"]).await.unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found["x"], Some(1));
        assert_eq!(found["y"], Some(2));
        assert_eq!(found["z"], None);
        assert_eq!(cache.exists(["x", "y", "z"]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn decode_mismatch_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = file_only(&dir);

        cache.set("a", &"text", None).await.unwrap();
        let err = cache.get::<Page>("a").await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization { .. }));
    }

    #[tokio::test]
    async fn falls_back_to_file_when_remote_unreachable() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Cache::builder()
            .remote(unreachable_remote())
            .file(file_store(&dir, clock))
            .build()
            .unwrap();

        assert!(cache.set("k", &"v", None).await.unwrap());
        assert_eq!(cache.get::<String>("k").await.unwrap(), Some("v".into()));
        assert_eq!(
            cache.tier(Tier::File).get::<String>("k").await.unwrap(),
            Some("v".into())
        );

        let err = cache.tier(Tier::Remote).get::<String>("k").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(cache.available_tiers().await, BTreeSet::from([Tier::File]));
    }

    #[tokio::test]
    async fn pinned_unconfigured_tier_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = file_only(&dir);

        let err = cache.tier(Tier::Remote).delete("k").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(cache.clear_tier(Tier::Remote).await.unwrap_err().is_unavailable());
        assert_eq!(
            cache.valid_tiers(),
            BTreeSet::from([Tier::Remote, Tier::File])
        );
        assert_eq!(cache.configured_tiers(), vec![Tier::File]);
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let dir = TempDir::new().unwrap();
        let (cache, clock) = file_only(&dir);

        cache.set("short", &1, Some(Duration::from_secs(5))).await.unwrap();
        cache.set("long", &2, Some(Duration::from_secs(500))).await.unwrap();
        clock.advance(Duration::from_secs(10));

        let swept = cache.cleanup().await.unwrap();
        assert_eq!(swept.get(&Tier::File), Some(&1));
        assert_eq!(cache.get::<i32>("long").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn clear_tier_leaves_other_tiers_alone() {
        let remote_dir = TempDir::new().unwrap();
        let file_dir = TempDir::new().unwrap();
        // A second file store stands in for the remote tier.
        let cache = Cache::builder()
            .remote(FileStore::new(remote_dir.path(), Keyspace::new("r:")))
            .file(FileStore::new(file_dir.path(), Keyspace::new("f:")))
            .build()
            .unwrap();

        cache.tier(Tier::Remote).set("same", &"remote", None).await.unwrap();
        cache.tier(Tier::File).set("same", &"file", None).await.unwrap();

        assert_eq!(cache.clear_tier(Tier::Remote).await.unwrap(), 1);
        assert_eq!(cache.tier(Tier::Remote).get::<String>("same").await.unwrap(), None);
        assert_eq!(
            cache.tier(Tier::File).get::<String>("same").await.unwrap(),
            Some("file".into())
        );

        let cleared = cache.clear_all().await.unwrap();
        assert_eq!(cleared.get(&Tier::File), Some(&1));
    }

    #[tokio::test]
    async fn counters_and_batches() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = file_only(&dir);

        assert!(cache.open_counter("hits", 1, None).await.unwrap());
        assert!(!cache.open_counter("hits", 1, None).await.unwrap());
        assert_eq!(cache.increment("hits", 2).await.unwrap(), 3);
        assert_eq!(cache.counter("hits").await.unwrap(), Some(3));

        let replies = cache
            .pipeline(vec![
                Command::set("a", &10, None).unwrap(),
                Command::get("a"),
                Command::get("missing"),
            ])
            .await
            .unwrap();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[1].decode::<i32>().unwrap(), Some(10));
        assert_eq!(replies[2].decode::<i32>().unwrap(), None);
    }

    #[tokio::test]
    async fn remember_computes_once() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = file_only(&dir);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .remember("view:/", None, move || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok("rendered".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "rendered");
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn builder_requires_a_tier() {
        assert!(matches!(
            Cache::builder().build(),
            Err(CacheError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn from_settings_does_not_touch_the_network() {
        let dir = TempDir::new().unwrap();
        let mut settings = CacheSettings::default();
        settings.remote.port = 1;
        settings.file.path = dir.path().to_path_buf();

        let cache = Cache::from_settings(&settings).unwrap();
        assert_eq!(cache.configured_tiers(), vec![Tier::Remote, Tier::File]);
        assert_eq!(cache.default_ttl(), Some(Duration::from_secs(3600)));
    }
}
