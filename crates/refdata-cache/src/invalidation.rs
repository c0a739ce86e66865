//! Cache invalidation support
//!
//! Invalidation is always whole-store: entries are never selectively kept
//! across a version change.

use refdata_core::VersionMarker;
use std::fmt;

/// Trait for caches that can be told to discard everything
pub trait CacheInvalidator: Send + Sync {
    /// Drop every entry and forget the known-good version. Returns the
    /// number of entries dropped.
    fn invalidate_all(&self) -> usize;
}

/// Why a store was invalidated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// A probe observed a marker different from the known-good version
    VersionChanged {
        from: VersionMarker,
        to: VersionMarker,
    },
    /// Requested through [`CacheInvalidator::invalidate_all`]
    Manual,
}

impl InvalidationEvent {
    pub fn version_changed(from: VersionMarker, to: VersionMarker) -> Self {
        Self::VersionChanged { from, to }
    }
}

impl fmt::Display for InvalidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionChanged { from, to } => write!(f, "version {} -> {}", from, to),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_event() {
        let event = InvalidationEvent::version_changed("2025-01".into(), "2025-02".into());
        match &event {
            InvalidationEvent::VersionChanged { from, to } => {
                assert_eq!(from.to_string(), "2025-01");
                assert_eq!(to.to_string(), "2025-02");
            }
            _ => panic!("Expected VersionChanged event"),
        }
        assert_eq!(event.to_string(), "version 2025-01 -> 2025-02");
        assert_eq!(InvalidationEvent::Manual.to_string(), "manual");
    }
}
