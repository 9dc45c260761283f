//! Cache Module
//!
//! Provides a filesystem-backed cache with per-entry TTL expiration, safe to
//! share between processes through per-key file locks.

pub mod codec;
pub mod key;
pub mod lock;
pub mod record;
mod store;
mod sweep;
mod value;


// Re-export public types
pub use codec::ValueCodec;
pub use lock::{AdvisoryLocker, LockGuard, LockStrategy, PathLocker, ProcessLocker};
pub use record::Record;
pub use store::{FileCache, DIRECTORY_MODE};
pub use sweep::{sweep_expired, SweepReport};
pub use value::{Fields, TypeRegistry, Value, GENERIC_OBJECT_CLASS};
