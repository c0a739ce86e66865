pub mod error;
pub mod types;

pub use error::{ErrorKind, ProbeError, RefdataError, Result};
pub use types::*;
