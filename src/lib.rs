//! File Cache - A filesystem-backed key/value cache
//!
//! Stores one record file per key with per-entry TTL expiration. Multiple
//! processes may share a cache directory; access to each record is
//! serialized with a per-key file lock.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{FileCache, TypeRegistry, Value, ValueCodec};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
