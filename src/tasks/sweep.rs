//! Periodic Sweep Task
//!
//! Background task that re-runs the expiry sweep on a cache directory.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::FileCache;

/// Spawns a background task that periodically deletes expired records.
///
/// Each pass runs on the blocking pool since the sweep does synchronous
/// filesystem I/O.
///
/// # Arguments
/// * `cache` - Shared reference to the cache
/// * `sweep_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(FileCache::open(&config, ValueCodec::default())?);
/// let sweep_handle = spawn_sweep_task(cache.clone(), 60);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(cache: Arc<FileCache>, sweep_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(sweep_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let cache = Arc::clone(&cache);
            match tokio::task::spawn_blocking(move || cache.sweep()).await {
                Ok(Ok(report)) if report.removed > 0 => {
                    info!("Expiry sweep: removed {} expired records", report.removed);
                }
                Ok(Ok(_)) => debug!("Expiry sweep: no expired records found"),
                Ok(Err(e)) => warn!("Expiry sweep failed: {}", e),
                Err(e) => warn!("Expiry sweep task panicked: {}", e),
            }
        }
    })
}
