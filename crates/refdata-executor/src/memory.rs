//! In-memory scripted executor
//!
//! Stands in for the warehouse in tests and demos. Each query text maps to a
//! queue of responses; responses are consumed in order and the last one is
//! repeated for every call after it.

use crate::executor::QueryExecutor;
use async_trait::async_trait;
use parking_lot::Mutex;
use refdata_core::{Record, RefdataError, Result};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// A scripted reply for one call
#[derive(Debug, Clone)]
pub enum Response {
    Rows(Vec<Record>),
    Failed(String),
    Unavailable(String),
}

impl Response {
    fn into_result(self) -> Result<Vec<Record>> {
        match self {
            Response::Rows(rows) => Ok(rows),
            Response::Failed(msg) => Err(RefdataError::QueryFailed(msg)),
            Response::Unavailable(msg) => Err(RefdataError::SourceUnavailable(msg)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Option<Duration>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the script for `query` with a single repeating result set
    pub fn set_rows(&self, query: impl Into<String>, rows: Vec<Record>) {
        self.set(query, Response::Rows(rows));
    }

    /// Replace the script for `query` with a single repeating response
    pub fn set(&self, query: impl Into<String>, response: Response) {
        self.scripts
            .lock()
            .insert(query.into(), VecDeque::from([response]));
    }

    /// Append a response to the script for `query`
    pub fn push(&self, query: impl Into<String>, response: Response) {
        self.scripts
            .lock()
            .entry(query.into())
            .or_default()
            .push_back(response);
    }

    pub fn push_rows(&self, query: impl Into<String>, rows: Vec<Record>) {
        self.push(query, Response::Rows(rows));
    }

    pub fn push_failure(&self, query: impl Into<String>, message: impl Into<String>) {
        self.push(query, Response::Failed(message.into()));
    }

    pub fn push_unavailable(&self, query: impl Into<String>, message: impl Into<String>) {
        self.push(query, Response::Unavailable(message.into()));
    }

    /// Number of times `query` has been executed
    pub fn calls(&self, query: &str) -> usize {
        self.calls.lock().get(query).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn next_response(&self, query: &str) -> Option<Response> {
        let mut scripts = self.scripts.lock();
        let script = scripts.get_mut(query)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Record>> {
        *self.calls.lock().entry(query.to_string()).or_insert(0) += 1;

        // Resolve before sleeping so the reply reflects the script at call time
        let response = self.next_response(query);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match response {
            Some(response) => response.into_result(),
            None => Err(RefdataError::QueryFailed(format!(
                "no result set registered for query: {}",
                query
            ))),
        }
    }
}
