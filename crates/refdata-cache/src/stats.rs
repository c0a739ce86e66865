//! Counters describing how the freshness cache has been serving requests

use std::sync::atomic::{AtomicU64, Ordering};

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Live counters, updated without taking the store lock
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    /// Misses satisfied by another caller's in-flight recomputation
    coalesced: AtomicU64,
    /// Payload queries sent to the executor
    recomputations: AtomicU64,
    probes: AtomicU64,
    probe_failures: AtomicU64,
    /// Full-store invalidations, version-driven or manual
    invalidations: AtomicU64,
    /// Entries pushed out by the capacity bound
    evictions: AtomicU64,
    entry_count: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub recomputations: u64,
    pub probes: u64,
    pub probe_failures: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub entry_count: u64,
}

impl StatsSnapshot {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of requests served from cache, 0.0 when nothing was asked
    pub fn hit_rate(&self) -> f64 {
        match self.total_requests() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        bump(&self.hits);
    }

    pub fn record_miss(&self) {
        bump(&self.misses);
    }

    pub fn record_coalesced(&self) {
        bump(&self.coalesced);
    }

    pub fn record_recomputation(&self) {
        bump(&self.recomputations);
    }

    pub fn record_probe(&self) {
        bump(&self.probes);
    }

    pub fn record_probe_failure(&self) {
        bump(&self.probe_failures);
    }

    pub fn record_invalidation(&self) {
        bump(&self.invalidations);
    }

    pub fn record_eviction(&self) {
        bump(&self.evictions);
    }

    pub fn set_entry_count(&self, count: u64) {
        self.entry_count.store(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        read(&self.hits)
    }

    pub fn misses(&self) -> u64 {
        read(&self.misses)
    }

    pub fn coalesced(&self) -> u64 {
        read(&self.coalesced)
    }

    pub fn recomputations(&self) -> u64 {
        read(&self.recomputations)
    }

    pub fn probes(&self) -> u64 {
        read(&self.probes)
    }

    pub fn probe_failures(&self) -> u64 {
        read(&self.probe_failures)
    }

    pub fn invalidations(&self) -> u64 {
        read(&self.invalidations)
    }

    pub fn evictions(&self) -> u64 {
        read(&self.evictions)
    }

    pub fn entry_count(&self) -> u64 {
        read(&self.entry_count)
    }

    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Counters are read one at a time, so a snapshot taken under load may
    /// mix values from neighbouring requests
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            coalesced: self.coalesced(),
            recomputations: self.recomputations(),
            probes: self.probes(),
            probe_failures: self.probe_failures(),
            invalidations: self.invalidations(),
            evictions: self.evictions(),
            entry_count: self.entry_count(),
        }
    }

    /// Zero every counter. The entry count describes the store, not past
    /// traffic, and is left alone.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.coalesced,
            &self.recomputations,
            &self.probes,
            &self.probe_failures,
            &self.invalidations,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_requests_and_probes() {
        let stats = CacheStats::new();
        stats.record_probe();
        stats.record_probe();
        stats.record_miss();
        stats.record_recomputation();
        stats.record_hit();

        assert_eq!(stats.probes(), 2);
        assert_eq!(stats.recomputations(), 1);
        assert_eq!(stats.total_requests(), 2);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_idle_hit_rate_is_zero() {
        assert_eq!(CacheStats::new().hit_rate(), 0.0);
        assert_eq!(StatsSnapshot::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_reset_keeps_entry_count() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_invalidation();
        stats.record_probe_failure();
        stats.set_entry_count(4);

        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                entry_count: 4,
                ..StatsSnapshot::default()
            }
        );
    }

    #[test]
    fn test_snapshot_is_detached() {
        let stats = CacheStats::new();
        stats.record_coalesced();
        let before = stats.snapshot();

        stats.record_coalesced();
        stats.record_eviction();

        assert_eq!(before.coalesced, 1);
        assert_eq!(before.evictions, 0);
        assert_eq!(stats.snapshot().coalesced, 2);
    }
}
