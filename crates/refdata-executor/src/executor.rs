use ahash::AHasher;
use async_trait::async_trait;
use refdata_core::{Record, Result};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Runs query text against an external engine and returns its rows.
///
/// Query text is opaque at this layer: nothing is parsed or validated, and
/// failures are reported as the engine reports them. Implementations do not
/// retry.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<Vec<Record>>;
}

#[async_trait]
impl<E: QueryExecutor + ?Sized> QueryExecutor for Arc<E> {
    async fn execute(&self, query: &str) -> Result<Vec<Record>> {
        (**self).execute(query).await
    }
}

#[async_trait]
impl<E: QueryExecutor + ?Sized> QueryExecutor for Box<E> {
    async fn execute(&self, query: &str) -> Result<Vec<Record>> {
        (**self).execute(query).await
    }
}

/// Short stable identifier for a query, used to correlate log lines without
/// printing whole SQL documents
pub fn query_fingerprint(query: &str) -> u64 {
    let mut hasher = AHasher::default();
    query.hash(&mut hasher);
    hasher.finish()
}
