//! Version probe
//!
//! Runs the fixed probe query and reads the version marker out of its single
//! record. An empty result or a missing/null field is a probe failure: it is
//! never turned into a "no version" marker.

use refdata_core::{ProbeError, RefdataError, Result, VersionMarker};
use refdata_executor::{query_fingerprint, QueryExecutor};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct VersionProbe {
    query: String,
    field: String,
}

impl VersionProbe {
    pub fn new(query: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            field: field.into(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Execute the probe and extract the marker. Never cached.
    pub async fn probe<E: QueryExecutor + ?Sized>(&self, executor: &E) -> Result<VersionMarker> {
        let records = executor
            .execute(&self.query)
            .await
            .map_err(RefdataError::into_probe_failure)?;

        let first = records.first().ok_or(ProbeError::EmptyResult)?;
        if records.len() > 1 {
            warn!(
                query = %format!("{:016x}", query_fingerprint(&self.query)),
                records = records.len(),
                "version probe returned more than one record; using the first"
            );
        }

        VersionMarker::from_record(first, &self.field)
            .ok_or_else(|| ProbeError::MissingField(self.field.clone()).into())
    }
}
