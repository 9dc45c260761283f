//! Error types for the file cache
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the file cache.
///
/// Misses are not errors: `fetch` reports them as `None`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Value cannot be represented by the codec
    #[error("Unsupported value kind: {0}")]
    UnsupportedValueKind(String),

    /// Lock could not be acquired within the configured bound
    #[error("Timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be converted to or from a Rust type
    #[error("Conversion error: {0}")]
    Conversion(#[from] serde_json::Error),

    /// Configuration value could not be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// == Result Type Alias ==
/// Convenience Result type for the file cache.
pub type Result<T> = std::result::Result<T, CacheError>;
