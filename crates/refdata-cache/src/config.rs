//! Cache configuration options

use std::time::Duration;

/// Field the version probe is read from unless configured otherwise
pub const DEFAULT_VERSION_FIELD: &str = "max_month";

/// Configuration for the freshness-gated cache
#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    /// Query returning one record that carries the source version marker
    pub probe_query: String,
    /// Name of the field holding the marker in the probe record
    pub version_field: String,
    /// Age after which the memoized version is re-probed even if unchanged.
    /// `None` memoizes until invalidation.
    pub probe_ttl: Option<Duration>,
    /// Maximum number of cached result sets
    pub max_entries: usize,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl FreshnessConfig {
    /// Create a configuration for the given probe query with default settings
    pub fn new(probe_query: impl Into<String>) -> Self {
        Self {
            probe_query: probe_query.into(),
            version_field: DEFAULT_VERSION_FIELD.to_string(),
            probe_ttl: None,
            max_entries: 1000,
            enabled: true,
        }
    }

    /// Set the probe record field holding the version marker
    pub fn with_version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = field.into();
        self
    }

    /// Set the maximum age of a memoized version
    pub fn with_probe_ttl(mut self, ttl: Duration) -> Self {
        self.probe_ttl = Some(ttl);
        self
    }

    /// Set the maximum number of entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Enable or disable the cache
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
