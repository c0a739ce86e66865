//! Query executor boundary
//!
//! The cache only ever asks the outside world one thing: run this query and
//! return its rows. [`QueryExecutor`] is that contract; the rest of this crate
//! provides a timeout wrapper and two self-contained engines.

pub mod executor;
pub mod file;
pub mod memory;
pub mod timeout;

pub use executor::{query_fingerprint, QueryExecutor};
pub use file::JsonFileExecutor;
pub use memory::{MemoryExecutor, Response};
pub use timeout::TimeoutExecutor;
