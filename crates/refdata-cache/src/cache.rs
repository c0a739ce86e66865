//! Freshness-gated query cache implementation

use crate::config::FreshnessConfig;
use crate::invalidation::{CacheInvalidator, InvalidationEvent};
use crate::probe::VersionProbe;
use crate::stats::CacheStats;
use ahash::AHashMap;
use lru::LruCache;
use parking_lot::Mutex;
use refdata_core::{Record, Result, VersionMarker};
use refdata_executor::{query_fingerprint, QueryExecutor};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identity of a cached query: its literal text.
///
/// The fingerprint is only used for hashing and logging; equality always
/// compares the full text.
#[derive(Debug, Clone)]
pub struct CacheKey {
    fingerprint: u64,
    query: Arc<str>,
}

impl CacheKey {
    pub fn new(query: &str) -> Self {
        Self {
            fingerprint: query_fingerprint(query),
            query: Arc::from(query),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.query == other.query
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.fingerprint)
    }
}

/// Entry stored in the cache
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Materialized result set
    pub rows: Vec<Record>,
    /// Version the rows were computed under
    pub version: VersionMarker,
    /// When this entry was created
    pub created_at: Instant,
    /// Number of times this entry was served
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(rows: Vec<Record>, version: VersionMarker) -> Self {
        Self {
            rows,
            version,
            created_at: Instant::now(),
            hit_count: 0,
        }
    }

    /// Get the age of this entry
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn summary(&self) -> EntrySummary {
        EntrySummary {
            version: self.version.clone(),
            rows: self.rows.len(),
            age: self.age(),
            hit_count: self.hit_count,
        }
    }
}

/// What is cached for one query, without its rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub version: VersionMarker,
    pub rows: usize,
    pub age: Duration,
    pub hit_count: u64,
}

/// Observable lifecycle state of a cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// No version has been observed yet
    Empty,
    /// A known-good version is recorded; entries may or may not be populated
    Fresh { version: VersionMarker },
}

struct Store {
    known_good: Option<VersionMarker>,
    probed_at: Option<Instant>,
    /// Ticket of the newest probe whose observation has been applied
    applied_ticket: u64,
    entries: LruCache<CacheKey, CacheEntry>,
    last_invalidation: Option<InvalidationEvent>,
}

impl Store {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            known_good: None,
            probed_at: None,
            applied_ticket: 0,
            entries: LruCache::new(capacity),
            last_invalidation: None,
        }
    }
}

type Flight = Arc<tokio::sync::Mutex<()>>;

/// A recompute flight and the number of callers that have joined it
type FlightSlot = (Flight, usize);

/// Query result cache that is trusted only while the source version is
/// unchanged.
///
/// Every request probes the source. When the probe disagrees with the
/// known-good version, every entry is dropped before anything is served.
/// All compare-and-invalidate steps and entry reads happen under one store
/// lock; executor calls happen outside it, at most one per query at a time.
pub struct FreshnessCache<E> {
    executor: E,
    probe: VersionProbe,
    config: FreshnessConfig,
    store: Mutex<Store>,
    next_ticket: AtomicU64,
    in_flight: Mutex<AHashMap<CacheKey, FlightSlot>>,
    stats: Arc<CacheStats>,
}

impl<E: QueryExecutor> FreshnessCache<E> {
    /// Create an empty cache over the given executor
    pub fn new(executor: E, config: FreshnessConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            executor,
            probe: VersionProbe::new(config.probe_query.clone(), config.version_field.clone()),
            config,
            store: Mutex::new(Store::new(capacity)),
            next_ticket: AtomicU64::new(0),
            in_flight: Mutex::new(AHashMap::new()),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Return the known-good version, probing only if none is memoized or
    /// the memoized one is older than `probe_ttl`
    pub async fn get_current_version(&self) -> Result<VersionMarker> {
        if let Some(version) = self.memoized_version() {
            return Ok(version);
        }
        self.observe_source().await
    }

    /// Return the rows for `query`, recomputing them if the source version
    /// has moved since they were cached
    pub async fn get_data(&self, query: &str) -> Result<Vec<Record>> {
        if !self.config.enabled {
            return self.executor.execute(query).await;
        }

        let key = CacheKey::new(query);
        let cached_max = self.get_current_version().await?;
        let current_max = self.observe_source().await?;

        if current_max != cached_max {
            debug!(
                key = %key,
                cached = %cached_max,
                current = %current_max,
                "version drift detected"
            );
        }

        if let Some(rows) = self.lookup(&key, &current_max) {
            self.stats.record_hit();
            debug!(key = %key, version = %current_max, "cache hit");
            return Ok(rows);
        }

        self.stats.record_miss();
        debug!(key = %key, version = %current_max, "cache miss");
        self.recompute(key, current_max).await
    }

    /// Known-good version, without probing
    pub fn known_version(&self) -> Option<VersionMarker> {
        self.store.lock().known_good.clone()
    }

    pub fn state(&self) -> CacheState {
        match self.known_version() {
            Some(version) => CacheState::Fresh { version },
            None => CacheState::Empty,
        }
    }

    /// Version the cached rows for `query` were computed under, if cached
    pub fn entry_version(&self, query: &str) -> Option<VersionMarker> {
        self.entry_summary(query).map(|summary| summary.version)
    }

    /// Describe the entry for `query` without touching its recency
    pub fn entry_summary(&self, query: &str) -> Option<EntrySummary> {
        self.store
            .lock()
            .entries
            .peek(&CacheKey::new(query))
            .map(CacheEntry::summary)
    }

    pub fn last_invalidation(&self) -> Option<InvalidationEvent> {
        self.store.lock().last_invalidation.clone()
    }

    /// Drop all entries and forget the known-good version
    pub fn invalidate_all(&self) -> usize {
        let dropped = {
            let mut store = self.store.lock();
            let dropped = store.entries.len();
            store.entries.clear();
            store.known_good = None;
            store.probed_at = None;
            // Probes issued before this point must not re-establish a version
            store.applied_ticket = self.next_ticket.load(Ordering::SeqCst);
            store.last_invalidation = Some(InvalidationEvent::Manual);
            dropped
        };

        self.stats.record_invalidation();
        self.stats.set_entry_count(0);
        info!(dropped, "cache invalidated");
        dropped
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current number of entries
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.store.lock().entries.is_empty()
    }

    pub fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn memoized_version(&self) -> Option<VersionMarker> {
        let store = self.store.lock();
        let version = store.known_good.as_ref()?;
        if let (Some(ttl), Some(probed_at)) = (self.config.probe_ttl, store.probed_at) {
            if probed_at.elapsed() >= ttl {
                return None;
            }
        }
        Some(version.clone())
    }

    /// Probe the source and fold the observation into the store
    async fn observe_source(&self) -> Result<VersionMarker> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.record_probe();

        match self.probe.probe(&self.executor).await {
            Ok(observed) => Ok(self.reconcile(ticket, observed)),
            Err(e) => {
                self.stats.record_probe_failure();
                warn!(error = %e, "version probe failed; cache state unchanged");
                Err(e)
            }
        }
    }

    /// Compare an observed marker with the known-good version and invalidate
    /// on mismatch. Returns the version the store now trusts.
    ///
    /// Observations from probes issued before the last applied one, or
    /// before a manual invalidation, are never recorded, so a slow probe
    /// cannot roll the store back. With no known-good version to fall back
    /// on, the observation is returned to its caller unrecorded.
    fn reconcile(&self, ticket: u64, observed: VersionMarker) -> VersionMarker {
        let mut store = self.store.lock();

        if ticket <= store.applied_ticket {
            debug!(
                ticket,
                applied = store.applied_ticket,
                "discarding out-of-order probe result"
            );
            return store.known_good.clone().unwrap_or(observed);
        }
        store.applied_ticket = ticket;
        store.probed_at = Some(Instant::now());

        match store.known_good.take() {
            Some(previous) if previous == observed => {
                store.known_good = Some(previous);
            }
            Some(previous) => {
                let dropped = store.entries.len();
                store.entries.clear();
                info!(
                    from = %previous,
                    to = %observed,
                    dropped,
                    "source version changed; cache invalidated"
                );
                store.last_invalidation =
                    Some(InvalidationEvent::version_changed(previous, observed.clone()));
                store.known_good = Some(observed.clone());
                self.stats.record_invalidation();
                self.stats.set_entry_count(0);
            }
            None => {
                // Entries can only exist from a version already forgotten
                store.entries.clear();
                info!(version = %observed, "known-good version established");
                store.known_good = Some(observed.clone());
                self.stats.set_entry_count(0);
            }
        }

        observed
    }

    /// Rows cached for `key`, only if tagged with `version` and `version` is
    /// still the known-good one
    fn lookup(&self, key: &CacheKey, version: &VersionMarker) -> Option<Vec<Record>> {
        let mut store = self.store.lock();
        if store.known_good.as_ref() != Some(version) {
            return None;
        }

        match store.entries.get_mut(key) {
            Some(entry) if entry.version == *version => {
                entry.hit_count += 1;
                return Some(entry.rows.clone());
            }
            Some(_) => {}
            None => return None,
        }

        warn!(key = %key, "dropping entry tagged with a superseded version");
        store.entries.pop(key);
        self.stats.set_entry_count(store.entries.len() as u64);
        None
    }

    async fn recompute(&self, key: CacheKey, version: VersionMarker) -> Result<Vec<Record>> {
        let flight = FlightHandle::join(&self.in_flight, &key);
        let _guard = flight.lock().await;

        // Another caller may have filled the entry while we waited
        if let Some(rows) = self.lookup(&key, &version) {
            self.stats.record_coalesced();
            return Ok(rows);
        }

        self.stats.record_recomputation();
        let start = Instant::now();
        match self.executor.execute(key.query()).await {
            Ok(rows) => {
                debug!(
                    key = %key,
                    rows = rows.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "recomputed result set"
                );
                self.store_result(&key, &version, rows.clone());
                Ok(rows)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "recomputation failed; nothing stored");
                Err(e)
            }
        }
    }

    fn store_result(&self, key: &CacheKey, version: &VersionMarker, rows: Vec<Record>) {
        let mut store = self.store.lock();
        if store.known_good.as_ref() != Some(version) {
            warn!(
                key = %key,
                computed_under = %version,
                "source version moved during recomputation; result not cached"
            );
            return;
        }

        let entry = CacheEntry::new(rows, version.clone());
        if let Some((evicted, _)) = store.entries.push(key.clone(), entry) {
            if evicted != *key {
                self.stats.record_eviction();
            }
        }
        self.stats.set_entry_count(store.entries.len() as u64);
    }
}

/// A caller's membership in the recompute flight for one key.
///
/// Dropping the handle leaves the flight, including when the owning future
/// is cancelled mid-wait or mid-execute. The last member out removes the
/// map entry.
struct FlightHandle<'a> {
    in_flight: &'a Mutex<AHashMap<CacheKey, FlightSlot>>,
    key: CacheKey,
    flight: Flight,
}

impl<'a> FlightHandle<'a> {
    fn join(in_flight: &'a Mutex<AHashMap<CacheKey, FlightSlot>>, key: &CacheKey) -> Self {
        let mut map = in_flight.lock();
        let (flight, members) = map.entry(key.clone()).or_default();
        *members += 1;
        Self {
            in_flight,
            key: key.clone(),
            flight: Arc::clone(flight),
        }
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.flight.lock().await
    }
}

impl Drop for FlightHandle<'_> {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock();
        let last = match map.get_mut(&self.key) {
            Some((_, members)) => {
                *members -= 1;
                *members == 0
            }
            None => false,
        };
        if last {
            map.remove(&self.key);
        }
    }
}

impl<E: QueryExecutor> CacheInvalidator for FreshnessCache<E> {
    fn invalidate_all(&self) -> usize {
        FreshnessCache::invalidate_all(self)
    }
}

impl<E> fmt::Debug for FreshnessCache<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.lock();
        f.debug_struct("FreshnessCache")
            .field("enabled", &self.config.enabled)
            .field("max_entries", &self.config.max_entries)
            .field("probe_ttl", &self.config.probe_ttl)
            .field("known_good", &store.known_good)
            .field("current_entries", &store.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refdata_core::{ErrorKind, ProbeError, RefdataError};
    use refdata_executor::{MemoryExecutor, Response};
    use serde_json::json;
    use std::time::Duration;

    const PROBE: &str = "SELECT MAX(month) AS max_month FROM dmd_history";
    const OME: &str = "SELECT * FROM ome_table ORDER BY id";
    const BNF: &str = "SELECT * FROM bnf_to_dmd ORDER BY bnf_code";

    fn probe_rows(version: &str) -> Vec<Record> {
        vec![json!({ "max_month": version }).as_object().cloned().unwrap()]
    }

    fn data_rows(tag: &str, n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                json!({ "id": i, "vmp": format!("{} product {}", tag, i), "ome": 1.5 })
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    fn setup(version: &str) -> (Arc<MemoryExecutor>, FreshnessCache<Arc<MemoryExecutor>>) {
        let executor = Arc::new(MemoryExecutor::new());
        executor.set_rows(PROBE, probe_rows(version));
        executor.set_rows(OME, data_rows("ome", 3));
        executor.set_rows(BNF, data_rows("bnf", 2));
        let cache = FreshnessCache::new(Arc::clone(&executor), FreshnessConfig::new(PROBE));
        (executor, cache)
    }

    #[tokio::test]
    async fn test_stable_version_serves_cached_rows() {
        let (executor, cache) = setup("2025-01");

        let first = cache.get_data(OME).await.unwrap();
        let second = cache.get_data(OME).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(executor.calls(OME), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn test_version_change_recomputes() {
        let (executor, cache) = setup("2025-01");

        let before = cache.get_data(OME).await.unwrap();

        executor.set_rows(PROBE, probe_rows("2025-02"));
        executor.set_rows(OME, data_rows("ome-feb", 4));
        let after = cache.get_data(OME).await.unwrap();

        assert_ne!(before, after);
        assert_eq!(after.len(), 4);
        assert_eq!(executor.calls(OME), 2);
        assert_eq!(cache.known_version(), Some(VersionMarker::from("2025-02")));
        assert_eq!(cache.entry_version(OME), Some(VersionMarker::from("2025-02")));
        assert_eq!(
            cache.last_invalidation(),
            Some(InvalidationEvent::version_changed(
                "2025-01".into(),
                "2025-02".into()
            ))
        );
    }

    #[tokio::test]
    async fn test_version_change_discards_other_entries() {
        let (executor, cache) = setup("2025-01");
        cache.get_data(OME).await.unwrap();
        cache.get_data(BNF).await.unwrap();
        assert_eq!(cache.len(), 2);

        executor.set_rows(PROBE, probe_rows("2025-02"));
        cache.get_data(OME).await.unwrap();

        // Only the requested query is recomputed; the other is gone, not kept
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entry_version(BNF), None);

        cache.get_data(BNF).await.unwrap();
        assert_eq!(executor.calls(BNF), 2);
        assert_eq!(cache.entry_version(BNF), Some(VersionMarker::from("2025-02")));
    }

    #[tokio::test]
    async fn test_version_moving_backward_invalidates() {
        let (executor, cache) = setup("2025-02");
        cache.get_data(OME).await.unwrap();

        executor.set_rows(PROBE, probe_rows("2025-01"));
        cache.get_data(OME).await.unwrap();

        assert_eq!(executor.calls(OME), 2);
        assert_eq!(cache.known_version(), Some(VersionMarker::from("2025-01")));
        assert_eq!(cache.stats().invalidations(), 1);
    }

    #[tokio::test]
    async fn test_empty_probe_fails_without_touching_entries() {
        let (executor, cache) = setup("2025-01");
        cache.get_data(OME).await.unwrap();

        executor.set_rows(PROBE, vec![]);
        let err = cache.get_data(OME).await.unwrap_err();

        assert!(matches!(
            err,
            RefdataError::ProbeFailed(ProbeError::EmptyResult)
        ));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entry_version(OME), Some(VersionMarker::from("2025-01")));
        assert_eq!(cache.known_version(), Some(VersionMarker::from("2025-01")));
        assert_eq!(executor.calls(OME), 1);
        assert_eq!(cache.stats().probe_failures(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_on_first_access_leaves_cache_empty() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.push_unavailable(PROBE, "connection reset by peer");
        executor.set_rows(OME, data_rows("ome", 3));
        let cache = FreshnessCache::new(Arc::clone(&executor), FreshnessConfig::new(PROBE));

        let err = cache.get_data(OME).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProbeFailed);
        assert_eq!(cache.state(), CacheState::Empty);
        assert_eq!(executor.calls(OME), 0);
    }

    #[tokio::test]
    async fn test_failed_recompute_after_invalidation_serves_nothing_stale() {
        let (executor, cache) = setup("2025-01");
        cache.get_data(OME).await.unwrap();
        cache.get_data(BNF).await.unwrap();

        executor.set_rows(PROBE, probe_rows("2025-02"));
        executor.set(OME, Response::Failed("Resources exceeded".into()));

        let err = cache.get_data(OME).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueryFailed);

        // Nothing from 2025-01 survives relabeled as 2025-02
        assert!(cache.is_empty());
        assert_eq!(cache.entry_version(BNF), None);

        executor.set_rows(BNF, data_rows("bnf-feb", 5));
        let rows = cache.get_data(BNF).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(executor.calls(BNF), 2);
    }

    #[tokio::test]
    async fn test_failed_recompute_keeps_other_entries() {
        let (executor, cache) = setup("2025-01");
        cache.get_data(BNF).await.unwrap();
        executor.set(OME, Response::Failed("Syntax error".into()));

        assert!(cache.get_data(OME).await.is_err());
        assert_eq!(cache.entry_version(OME), None);
        assert_eq!(cache.entry_version(BNF), Some(VersionMarker::from("2025-01")));

        cache.get_data(BNF).await.unwrap();
        assert_eq!(executor.calls(BNF), 1);
    }

    #[tokio::test]
    async fn test_current_version_is_memoized() {
        let (executor, cache) = setup("2025-01");

        assert_eq!(cache.state(), CacheState::Empty);
        let v1 = cache.get_current_version().await.unwrap();
        executor.set_rows(PROBE, probe_rows("2025-02"));
        let v2 = cache.get_current_version().await.unwrap();

        assert_eq!(v1, VersionMarker::from("2025-01"));
        assert_eq!(v1, v2);
        assert_eq!(executor.calls(PROBE), 1);
        assert_eq!(
            cache.state(),
            CacheState::Fresh {
                version: "2025-01".into()
            }
        );
    }

    #[tokio::test]
    async fn test_probe_ttl_forces_reprobe() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.set_rows(PROBE, probe_rows("2025-01"));
        executor.set_rows(OME, data_rows("ome", 3));
        let config = FreshnessConfig::new(PROBE).with_probe_ttl(Duration::from_millis(40));
        let cache = FreshnessCache::new(Arc::clone(&executor), config);

        cache.get_data(OME).await.unwrap();
        let probes_after_load = executor.calls(PROBE);

        executor.set_rows(PROBE, probe_rows("2025-02"));
        assert_eq!(
            cache.get_current_version().await.unwrap(),
            VersionMarker::from("2025-01")
        );
        assert_eq!(executor.calls(PROBE), probes_after_load);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(
            cache.get_current_version().await.unwrap(),
            VersionMarker::from("2025-02")
        );
        assert_eq!(executor.calls(PROBE), probes_after_load + 1);
        // The re-probe saw a new version, so the old entry is gone
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_stale_entry_is_never_served() {
        let (executor, cache) = setup("2025-01");
        cache.get_current_version().await.unwrap();

        // Plant an entry tagged with an older version behind the cache's back
        cache.store.lock().entries.push(
            CacheKey::new(OME),
            CacheEntry::new(data_rows("old", 1), "2024-12".into()),
        );

        let rows = cache.get_data(OME).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(executor.calls(OME), 1);
        assert_eq!(cache.entry_version(OME), Some(VersionMarker::from("2025-01")));
    }

    #[tokio::test]
    async fn test_out_of_order_probe_does_not_roll_back() {
        let (_executor, cache) = setup("2025-01");
        cache.get_data(OME).await.unwrap();

        let issued_late = cache.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let issued_early = issued_late - 1;

        let feb = VersionMarker::from("2025-02");
        assert_eq!(cache.reconcile(issued_late, feb.clone()), feb);
        // An older probe returning afterwards is ignored
        assert_eq!(cache.reconcile(issued_early, "2025-01".into()), feb);
        assert_eq!(cache.known_version(), Some(VersionMarker::from("2025-02")));
        assert_eq!(cache.stats().invalidations(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_compute_once() {
        let executor = Arc::new(MemoryExecutor::new().with_latency(Duration::from_millis(30)));
        executor.set_rows(PROBE, probe_rows("2025-01"));
        executor.set_rows(OME, data_rows("ome", 3));
        let cache = Arc::new(FreshnessCache::new(
            Arc::clone(&executor),
            FreshnessConfig::new(PROBE),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get_data(OME).await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(executor.calls(OME), 1);
        assert!(results.iter().all(|rows| *rows == results[0]));
        assert_eq!(cache.stats().recomputations(), 1);
        assert!(cache.in_flight.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_from_superseded_version_is_returned_not_stored() {
        let executor = Arc::new(MemoryExecutor::new().with_latency(Duration::from_millis(100)));
        executor.set_rows(PROBE, probe_rows("2025-01"));
        executor.set_rows(OME, data_rows("ome", 3));
        executor.set_rows(BNF, data_rows("bnf", 2));
        let cache = Arc::new(FreshnessCache::new(
            Arc::clone(&executor),
            FreshnessConfig::new(PROBE),
        ));
        cache.get_current_version().await.unwrap();

        // OME probes at t+0..100 and executes at t+100..200
        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_data(OME).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // This probe lands at t+150, while OME is still executing
        executor.set_rows(PROBE, probe_rows("2025-02"));
        cache.get_data(BNF).await.unwrap();

        let rows = slow.await.unwrap().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(executor.calls(OME), 1);
        assert_eq!(cache.entry_version(OME), None);
        assert_eq!(cache.known_version(), Some(VersionMarker::from("2025-02")));
        assert_eq!(cache.entry_version(BNF), Some(VersionMarker::from("2025-02")));
    }

    #[tokio::test]
    async fn test_version_read_before_invalidate_all_is_not_recorded() {
        let (executor, cache) = setup("2025-01");
        cache.get_data(OME).await.unwrap();

        let issued_before = cache.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        cache.invalidate_all();

        let returned = cache.reconcile(issued_before, "2024-12".into());
        assert_eq!(returned, VersionMarker::from("2024-12"));
        assert_eq!(cache.state(), CacheState::Empty);

        // A request issued afterwards re-establishes the live version
        cache.get_data(OME).await.unwrap();
        assert_eq!(cache.known_version(), Some(VersionMarker::from("2025-01")));
        assert_eq!(cache.entry_version(OME), Some(VersionMarker::from("2025-01")));
        assert_eq!(executor.calls(OME), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_recompute_leaves_no_flight_behind() {
        let executor = Arc::new(MemoryExecutor::new().with_latency(Duration::from_millis(100)));
        executor.set_rows(PROBE, probe_rows("2025-01"));
        executor.set_rows(OME, data_rows("ome", 3));
        let cache = FreshnessCache::new(Arc::clone(&executor), FreshnessConfig::new(PROBE));
        cache.get_current_version().await.unwrap();

        // Cancelled halfway through the payload query
        let cancelled =
            tokio::time::timeout(Duration::from_millis(150), cache.get_data(OME)).await;
        assert!(cancelled.is_err());
        assert_eq!(executor.calls(OME), 1);
        assert!(cache.in_flight.lock().is_empty());
        assert_eq!(cache.entry_version(OME), None);

        cache.get_data(OME).await.unwrap();
        assert!(cache.in_flight.lock().is_empty());
        assert_eq!(cache.entry_version(OME), Some(VersionMarker::from("2025-01")));
    }

    #[tokio::test]
    async fn test_entry_summary_tracks_hits() {
        let (_executor, cache) = setup("2025-01");
        assert_eq!(cache.entry_summary(OME), None);

        cache.get_data(OME).await.unwrap();
        cache.get_data(OME).await.unwrap();
        cache.get_data(OME).await.unwrap();

        let summary = cache.entry_summary(OME).unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.hit_count, 2);
        assert_eq!(summary.version, VersionMarker::from("2025-01"));
    }

    #[tokio::test]
    async fn test_disabled_cache_passes_through() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.set_rows(OME, data_rows("ome", 3));
        let config = FreshnessConfig::new(PROBE).with_enabled(false);
        let cache = FreshnessCache::new(Arc::clone(&executor), config);

        cache.get_data(OME).await.unwrap();
        cache.get_data(OME).await.unwrap();

        assert_eq!(executor.calls(OME), 2);
        assert_eq!(executor.calls(PROBE), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.set_rows(PROBE, probe_rows("2025-01"));
        let config = FreshnessConfig::new(PROBE).with_max_entries(2);
        let cache = FreshnessCache::new(Arc::clone(&executor), config);

        for i in 0..3 {
            let query = format!("SELECT * FROM dataset_{}", i);
            executor.set_rows(query.clone(), data_rows("x", 1));
            cache.get_data(&query).await.unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);
        assert_eq!(cache.entry_version("SELECT * FROM dataset_0"), None);
    }

    #[tokio::test]
    async fn test_invalidate_all_returns_to_empty() {
        let (executor, cache) = setup("2025-01");
        cache.get_data(OME).await.unwrap();
        cache.get_data(BNF).await.unwrap();

        let invalidator: &dyn CacheInvalidator = &cache;
        assert_eq!(invalidator.invalidate_all(), 2);
        assert_eq!(cache.state(), CacheState::Empty);
        assert_eq!(cache.last_invalidation(), Some(InvalidationEvent::Manual));

        let probes = executor.calls(PROBE);
        cache.get_data(OME).await.unwrap();
        assert_eq!(executor.calls(OME), 2);
        assert!(executor.calls(PROBE) > probes);
    }

    #[test]
    fn test_cache_key_identity() {
        let a = CacheKey::new(OME);
        let b = CacheKey::new(OME);
        let c = CacheKey::new(BNF);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.query(), OME);
        assert_eq!(a.to_string().len(), 16);
    }
}
