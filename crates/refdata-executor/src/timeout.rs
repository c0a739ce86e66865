//! Bounded-time execution

use crate::executor::{query_fingerprint, QueryExecutor};
use async_trait::async_trait;
use refdata_core::{Record, RefdataError, Result};
use std::time::Duration;
use tracing::warn;

/// Wraps an executor so that no call blocks longer than `timeout`.
///
/// An elapsed deadline is reported as [`RefdataError::QueryFailed`].
#[derive(Debug)]
pub struct TimeoutExecutor<E> {
    inner: E,
    timeout: Duration,
}

impl<E: QueryExecutor> TimeoutExecutor<E> {
    pub fn new(inner: E, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: QueryExecutor> QueryExecutor for TimeoutExecutor<E> {
    async fn execute(&self, query: &str) -> Result<Vec<Record>> {
        match tokio::time::timeout(self.timeout, self.inner.execute(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    query = %format!("{:016x}", query_fingerprint(query)),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "query timed out"
                );
                Err(RefdataError::QueryFailed(format!(
                    "query timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}
