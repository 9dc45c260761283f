//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is open.
//!
//! # Tasks
//! - Expiry Sweep: Deletes expired record files at a configured interval

mod sweep;

pub use sweep::spawn_sweep_task;
