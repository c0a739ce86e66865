//! Freshness-Gated Query Cache
//!
//! Caches reference-dataset query results for as long as the source dataset's
//! version marker stays the same, and throws everything away the moment it
//! changes.
//!
//! # Features
//!
//! - **Version gating**: every request probes the source; a changed marker
//!   (in either direction) invalidates the whole store
//! - **Per-entry versions**: an entry is served only if tagged with the
//!   current known-good version
//! - **Single flight**: concurrent misses for one query share one execution
//! - **Probe TTL**: optional maximum age for the memoized version
//! - **LRU bound**: capacity-limited store
//! - **Statistics**: hits, misses, probes, invalidations, recomputations
//!
//! # Example
//!
//! ```ignore
//! use refdata_cache::{Dataset, FreshnessCache, FreshnessConfig};
//! use std::sync::Arc;
//!
//! let config = FreshnessConfig::new("SELECT MAX(month) AS max_month FROM dmd_history");
//! let cache = Arc::new(FreshnessCache::new(executor, config));
//! let dataset = Dataset::new("ome", ome_sql, Arc::clone(&cache));
//!
//! let rows = dataset.get_fresh_data_if_needed().await?;
//! ```

pub mod cache;
pub mod config;
pub mod dataset;
pub mod invalidation;
pub mod probe;
pub mod stats;

pub use cache::{CacheEntry, CacheKey, CacheState, EntrySummary, FreshnessCache};
pub use config::{FreshnessConfig, DEFAULT_VERSION_FIELD};
pub use dataset::{load_query, Dataset};
pub use invalidation::{CacheInvalidator, InvalidationEvent};
pub use probe::VersionProbe;
pub use stats::{CacheStats, StatsSnapshot};
