use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefdataError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Version probe failed: {0}")]
    ProbeFailed(#[from] ProbeError),

    #[error("Query file not found: {}", .0.display())]
    QueryFileNotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Why the version probe could not produce a marker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{0}")]
    Query(String),

    #[error("probe query returned no records")]
    EmptyResult,

    #[error("probe record has no value for field '{0}'")]
    MissingField(String),
}

/// Discriminant of [`RefdataError`], for callers that branch on the kind of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceUnavailable,
    QueryFailed,
    ProbeFailed,
    QueryFileNotFound,
    Io,
}

impl RefdataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RefdataError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            RefdataError::QueryFailed(_) => ErrorKind::QueryFailed,
            RefdataError::ProbeFailed(_) => ErrorKind::ProbeFailed,
            RefdataError::QueryFileNotFound(_) => ErrorKind::QueryFileNotFound,
            RefdataError::IoError(_) => ErrorKind::Io,
        }
    }

    /// True for failures reported by the external engine, probe included
    pub fn is_query_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceUnavailable | ErrorKind::QueryFailed | ErrorKind::ProbeFailed
        )
    }

    /// Re-tag an executor failure that happened while running the version probe
    pub fn into_probe_failure(self) -> Self {
        match self {
            RefdataError::ProbeFailed(_) => self,
            other => RefdataError::ProbeFailed(ProbeError::Query(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, RefdataError>;
