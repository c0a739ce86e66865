//! JSON-file backed executor
//!
//! Serves result sets from a JSON document of the form
//! `{ "<query text>": [ {record}, ... ] }`. The file is re-read on every
//! call, so rewriting it behaves like the source publishing a new version.

use crate::executor::{query_fingerprint, QueryExecutor};
use async_trait::async_trait;
use refdata_core::{Record, RefdataError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JsonFileExecutor {
    path: PathBuf,
}

impl JsonFileExecutor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<serde_json::Map<String, Value>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RefdataError::SourceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RefdataError::QueryFailed(format!(
                "{}: expected a JSON object keyed by query text",
                self.path.display()
            ))),
            Err(e) => Err(RefdataError::QueryFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl QueryExecutor for JsonFileExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Record>> {
        let start = Instant::now();
        let mut results = self.load().await?;

        let rows = match results.remove(query.trim()) {
            Some(Value::Array(rows)) => rows,
            Some(_) => {
                return Err(RefdataError::QueryFailed(
                    "result set must be an array of records".to_string(),
                ))
            }
            None => {
                return Err(RefdataError::QueryFailed(format!(
                    "no result set for query {:016x} in {}",
                    query_fingerprint(query),
                    self.path.display()
                )))
            }
        };

        let records = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(record) => Ok(record),
                other => Err(RefdataError::QueryFailed(format!(
                    "expected a record, found {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            query = %format!("{:016x}", query_fingerprint(query)),
            rows = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "executed query from {}",
            self.path.display()
        );

        Ok(records)
    }
}
