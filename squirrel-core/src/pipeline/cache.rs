//! The cache engine: distinguished head of every workflow chain.
//!
//! On a hit the cached nuts are returned and no further stage runs. On a
//! miss the engine either runs the chain synchronously (full mode) or
//! returns a fast, partially processed result immediately while the full
//! computation proceeds in the background (best-effort mode). Concurrent
//! requests for the same key never duplicate a computation: the first caller
//! installs a shared future, everyone else awaits it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::{keys, Properties};
use crate::core::{Result, SquirrelError};
use crate::nut::{find_by_name, Heap, HeapListener, Nut};
use crate::pipeline::chain::run_chains;
use crate::pipeline::request::{PipelineRequest, RequestKey, BEST_EFFORT_PREFIX};
use crate::pipeline::stage::EngineType;
use crate::pool::WorkerPool;

/// Name→nut map of one computed result, in production order.
pub type ResultMap = IndexMap<String, Nut>;

type FillOutput = std::result::Result<ResultMap, Arc<SquirrelError>>;
type SharedFill = Shared<BoxFuture<'static, FillOutput>>;
type FillTable = Arc<Mutex<HashMap<RequestKey, SharedFill>>>;

/// The value cached per request key: the best-effort half and the fully
/// processed half, independently populated.
#[derive(Clone, Default, Debug)]
pub struct CacheResult {
    best_effort: Option<ResultMap>,
    default: Option<ResultMap>,
}

impl CacheResult {
    /// Creates an entry holding only the best-effort half.
    pub fn with_best_effort(map: ResultMap) -> Self {
        Self {
            best_effort: Some(map),
            default: None,
        }
    }

    /// Creates an entry holding only the fully processed half.
    pub fn with_default(map: ResultMap) -> Self {
        Self {
            best_effort: None,
            default: Some(map),
        }
    }

    /// The best-effort half, if populated.
    pub fn best_effort_result(&self) -> Option<&ResultMap> {
        self.best_effort.as_ref()
    }

    /// The fully processed half, if populated.
    pub fn default_result(&self) -> Option<&ResultMap> {
        self.default.as_ref()
    }

    /// Sets the best-effort half, keeping the other one.
    pub fn set_best_effort(&mut self, map: ResultMap) {
        self.best_effort = Some(map);
    }

    /// Sets the fully processed half, keeping the other one.
    pub fn set_default(&mut self, map: ResultMap) {
        self.default = Some(map);
    }
}

/// Entry store behind the cache engine.
///
/// The eviction policy (TTL, size) belongs to the store, not to the engine;
/// swap in [`MokaCacheStore`] for a bounded TTL policy or keep the plain
/// [`MemoryCacheStore`].
pub trait CacheBackend: Send + Sync {
    /// Reads the entry for a key.
    fn get(&self, key: &RequestKey) -> Option<CacheResult>;
    /// Writes the entry for a key.
    fn put(&self, key: RequestKey, entry: CacheResult);
    /// Removes the entry for a key.
    fn remove(&self, key: &RequestKey);
}

/// Unbounded map-backed store.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<RequestKey, CacheResult>>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCacheStore {
    fn get(&self, key: &RequestKey) -> Option<CacheResult> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: RequestKey, entry: CacheResult) {
        self.entries.lock().insert(key, entry);
    }

    fn remove(&self, key: &RequestKey) {
        self.entries.lock().remove(key);
    }
}

/// Bounded store with time-to-live eviction, backed by moka.
pub struct MokaCacheStore {
    cache: moka::sync::Cache<RequestKey, CacheResult>,
}

impl MokaCacheStore {
    /// Default maximum number of entries.
    pub const DEFAULT_CAPACITY: u64 = 10_000;
    /// Default entry time-to-live in seconds.
    pub const DEFAULT_TTL_SECS: u64 = 300;

    /// Supported configuration keys.
    pub const SUPPORTED_KEYS: &'static [&'static str] = &[keys::TIME_TO_LIVE];

    /// Creates a store with the given capacity and entry time-to-live.
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Builds a store from a property bag, honoring [`keys::TIME_TO_LIVE`].
    pub fn from_properties(props: &Properties) -> Result<Self> {
        props.validate("moka cache store", Self::SUPPORTED_KEYS)?;
        let ttl = props.u64_or(keys::TIME_TO_LIVE, Self::DEFAULT_TTL_SECS)?;
        Ok(Self::new(Self::DEFAULT_CAPACITY, Duration::from_secs(ttl)))
    }
}

impl CacheBackend for MokaCacheStore {
    fn get(&self, key: &RequestKey) -> Option<CacheResult> {
        self.cache.get(key)
    }

    fn put(&self, key: RequestKey, entry: CacheResult) {
        self.cache.insert(key, entry);
    }

    fn remove(&self, key: &RequestKey) {
        self.cache.invalidate(key);
    }
}

/// Removes the cache entry of one request key when its heap reports an
/// update.
struct InvalidateCache {
    key: RequestKey,
    store: Arc<dyn CacheBackend>,
}

impl HeapListener for InvalidateCache {
    fn nut_updated(&self, heap: &Heap) {
        tracing::info!(key = %self.key, heap = heap.id(), "invalidating cache entry");
        self.store.remove(&self.key);
    }
}

/// The head stage of a workflow.
pub struct CacheEngine {
    enabled: bool,
    best_effort: bool,
    store: Arc<dyn CacheBackend>,
    pool: WorkerPool,
    fills: FillTable,
    best_effort_jobs: Arc<Mutex<HashMap<RequestKey, ResultMap>>>,
    observed: Arc<Mutex<HashSet<RequestKey>>>,
}

impl CacheEngine {
    /// Supported configuration keys.
    pub const SUPPORTED_KEYS: &'static [&'static str] = &[keys::CACHE, keys::BEST_EFFORT];

    /// Creates a cache engine.
    ///
    /// With `enabled` false the engine degenerates to a pass-through that
    /// re-runs the chain on every call.
    pub fn new(
        enabled: bool,
        best_effort: bool,
        store: Arc<dyn CacheBackend>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            enabled,
            best_effort,
            store,
            pool,
            fills: Arc::new(Mutex::new(HashMap::new())),
            best_effort_jobs: Arc::new(Mutex::new(HashMap::new())),
            observed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Builds an engine from a property bag, honoring [`keys::CACHE`] and
    /// [`keys::BEST_EFFORT`].
    pub fn from_properties(
        props: &Properties,
        store: Arc<dyn CacheBackend>,
        pool: WorkerPool,
    ) -> Result<Self> {
        props.validate("cache engine", Self::SUPPORTED_KEYS)?;
        Ok(Self::new(
            props.bool_or(keys::CACHE, true)?,
            props.bool_or(keys::BEST_EFFORT, false)?,
            store,
            pool,
        ))
    }

    /// Whether caching is active.
    pub fn works(&self) -> bool {
        self.enabled
    }

    /// Whether best-effort mode is active.
    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Execution category of the head stage.
    pub fn engine_type(&self) -> EngineType {
        EngineType::Cache
    }

    /// Processes a request through the cache.
    ///
    /// Returns the cached nuts on a hit. On a miss, full mode runs the chain
    /// and blocks until the shared computation settles; best-effort mode
    /// returns the prefixed fast-path nuts immediately and upgrades the
    /// entry in the background.
    pub async fn process(&self, request: &PipelineRequest) -> Result<Vec<Nut>> {
        if !self.enabled {
            return run_chains(request, false).await;
        }

        let key = request.key();
        if let Some(entry) = self.store.get(&key) {
            if let Some(map) = entry.default_result().or_else(|| entry.best_effort_result())
            {
                tracing::info!(key = %key, "request served from cache");
                return Ok(map.values().cloned().collect());
            }
        }

        self.observe_invalidation(request, &key);

        if self.best_effort {
            let prefixed: Vec<Nut> = request
                .nuts()
                .iter()
                .cloned()
                .map(|nut| nut.with_prefix(BEST_EFFORT_PREFIX))
                .collect();
            let fast_request = request
                .with_nuts(prefixed)
                .with_variant(Some(BEST_EFFORT_PREFIX));
            let fast = run_chains(&fast_request, true).await?;
            let fast_map: ResultMap = fast
                .iter()
                .map(|nut| (nut.name().to_string(), nut.clone()))
                .collect();

            let mut jobs = self.best_effort_jobs.lock();
            if !jobs.contains_key(&key) {
                jobs.insert(key.clone(), fast_map.clone());
                // The job's final cleanup locks the same map, so it cannot
                // observe the table before this insert is visible.
                self.spawn_best_effort_fill(request.clone(), fast_map);
            }
            drop(jobs);

            Ok(fast)
        } else {
            let shared = Self::schedule_fill(
                &self.pool,
                self.store.clone(),
                self.fills.clone(),
                request.clone(),
            );
            let map = shared.await.map_err(SquirrelError::Async)?;
            Ok(map.values().cloned().collect())
        }
    }

    /// Resolves one logical path through the cache.
    ///
    /// Best-effort-prefixed paths resolve against the in-flight best-effort
    /// job or the best-effort half; other paths await any in-flight full
    /// computation and resolve against the default half. A total miss
    /// triggers the full computation and retries once; a second miss is a
    /// processing error. Paths absent from the top-level names are searched
    /// through every result nut's referenced list.
    pub async fn lookup(&self, request: &PipelineRequest, path: &str) -> Result<Option<Nut>> {
        if !self.enabled {
            let nuts = run_chains(request, false).await?;
            return Ok(find_by_name(&nuts, path));
        }

        let key = request.key();
        let is_best_effort = path.starts_with(BEST_EFFORT_PREFIX);
        let mut recomputed = false;

        loop {
            let value: Option<ResultMap> = if is_best_effort {
                let in_flight = self.best_effort_jobs.lock().get(&key).cloned();
                match in_flight {
                    Some(map) => Some(map),
                    None => self.store.get(&key).and_then(|entry| {
                        entry
                            .best_effort_result()
                            .cloned()
                            .or_else(|| entry.default_result().cloned())
                    }),
                }
            } else {
                let in_flight = self.fills.lock().get(&key).cloned();
                if let Some(shared) = in_flight {
                    shared.await.map_err(SquirrelError::Async)?;
                }
                self.store
                    .get(&key)
                    .and_then(|entry| entry.default_result().cloned())
            };

            let Some(map) = value else {
                if recomputed {
                    return Err(SquirrelError::Processing {
                        message: format!(
                            "no cache entry for '{key}' after recomputation \
                             while resolving '{path}'"
                        ),
                    });
                }
                self.process(request).await?;
                recomputed = true;
                continue;
            };

            if let Some(nut) = map.get(path) {
                return Ok(Some(nut.clone()));
            }
            for nut in map.values() {
                if let Some(found) = find_by_name(nut.referenced(), path) {
                    return Ok(Some(found));
                }
            }
            return Ok(None);
        }
    }

    /// Registers the invalidation listener for a key, once per distinct key.
    fn observe_invalidation(&self, request: &PipelineRequest, key: &RequestKey) {
        let mut observed = self.observed.lock();
        if observed.insert(key.clone()) {
            request.heap().add_listener(Arc::new(InvalidateCache {
                key: key.clone(),
                store: self.store.clone(),
            }));
        }
    }

    /// Returns the shared in-flight computation for the request, installing
    /// a new one when none exists.
    ///
    /// The table lock is held across the spawn so the job's final removal
    /// can never run before the insert.
    fn schedule_fill(
        pool: &WorkerPool,
        store: Arc<dyn CacheBackend>,
        fills: FillTable,
        request: PipelineRequest,
    ) -> SharedFill {
        let key = request.key();
        let mut guard = fills.lock();
        if let Some(existing) = guard.get(&key) {
            return existing.clone();
        }

        tracing::debug!(key = %key, "scheduling full computation");
        let handle = pool.spawn({
            let fills = fills.clone();
            let key = key.clone();
            async move {
                let result = Self::fill_default(store, request).await.map_err(Arc::new);
                fills.lock().remove(&key);
                result
            }
        });

        let operation = format!("full computation of '{key}'");
        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(Arc::new(SquirrelError::Interrupted {
                    operation: format!("{operation}: {join_error}"),
                })),
            }
        }
        .boxed()
        .shared();
        guard.insert(key, shared.clone());
        shared
    }

    /// Runs the chain end-to-end and stores the fully processed half.
    async fn fill_default(
        store: Arc<dyn CacheBackend>,
        request: PipelineRequest,
    ) -> Result<ResultMap> {
        let key = request.key();
        let nuts = run_chains(&request, false).await?;

        let mut to_cache = ResultMap::new();
        for nut in nuts {
            if nut.is_cacheable() {
                let buffered = nut.into_buffered().await?;
                to_cache.insert(buffered.name().to_string(), buffered);
            }
        }

        let entry = match store.get(&key) {
            Some(mut existing) => {
                existing.set_default(to_cache.clone());
                existing
            },
            None => CacheResult::with_default(to_cache.clone()),
        };
        tracing::debug!(key = %key, nuts = to_cache.len(), "caching full result");
        store.put(key, entry);
        Ok(to_cache)
    }

    /// Converts the fast-path nuts to buffered form, stores the best-effort
    /// half and chains the full computation on the same key.
    fn spawn_best_effort_fill(&self, request: PipelineRequest, fast: ResultMap) {
        let key = request.key();
        let store = self.store.clone();
        let fills = self.fills.clone();
        let jobs = self.best_effort_jobs.clone();
        let pool = self.pool.clone();

        pool.clone().spawn(async move {
            let outcome: Result<()> = async {
                let mut to_cache = ResultMap::new();
                for nut in fast.values() {
                    let buffered = nut.clone().into_buffered().await?;
                    if buffered.is_cacheable() {
                        for reference in buffered.referenced() {
                            if reference.is_cacheable() {
                                to_cache
                                    .insert(reference.name().to_string(), reference.clone());
                            }
                        }
                        to_cache.insert(buffered.name().to_string(), buffered);
                    }
                }

                let entry = match store.get(&key) {
                    Some(mut existing) => {
                        existing.set_best_effort(to_cache);
                        existing
                    },
                    None => CacheResult::with_best_effort(to_cache),
                };
                tracing::debug!(key = %key, "caching best-effort result");
                store.put(key.clone(), entry);

                Self::schedule_fill(&pool, store.clone(), fills.clone(), request);
                Ok(())
            }
            .await;

            if let Err(error) = &outcome {
                tracing::warn!(key = %key, %error, "best-effort cache fill failed");
            }
            jobs.lock().remove(&key);
        });
    }
}
