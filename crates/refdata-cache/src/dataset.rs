//! Named datasets over a shared freshness cache
//!
//! A [`Dataset`] pins one primary query to a cache and exposes the single
//! parameterless call the presentation layer needs.

use crate::cache::FreshnessCache;
use refdata_core::{Record, RefdataError, Result};
use refdata_executor::QueryExecutor;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Read query text from a `.sql` file. The text is trimmed and otherwise
/// left untouched.
pub fn load_query(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(RefdataError::QueryFileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

pub struct Dataset<E> {
    name: String,
    query: String,
    cache: Arc<FreshnessCache<E>>,
}

impl<E: QueryExecutor> Dataset<E> {
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        cache: Arc<FreshnessCache<E>>,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            cache,
        }
    }

    /// Build a dataset whose query text lives in a file
    pub fn from_file(
        name: impl Into<String>,
        path: &Path,
        cache: Arc<FreshnessCache<E>>,
    ) -> Result<Self> {
        Ok(Self::new(name, load_query(path)?, cache))
    }

    /// The dataset's rows, refreshed only if the source version moved
    pub async fn get_fresh_data_if_needed(&self) -> Result<Vec<Record>> {
        self.cache.get_data(&self.query).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn cache(&self) -> &Arc<FreshnessCache<E>> {
        &self.cache
    }
}
