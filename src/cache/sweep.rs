//! Expiry Sweep Module
//!
//! Scans a cache directory and deletes records whose expiry has passed.
//! Runs once when a store is opened and on demand afterwards.
//!
//! The sweep takes no per-record locks: a record rewritten by another process
//! between the read and the delete can be lost. Stores tolerate that because
//! a missing record is only ever a miss. Lock files are only deleted while
//! locked and with their record absent.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::lock::{AdvisoryLocker, LOCK_SUFFIX};
use crate::cache::record::{remove_record, Record};
use crate::error::Result;

// == Sweep Report ==
/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Record files inspected
    pub scanned: usize,
    /// Expired records deleted
    pub removed: usize,
    /// Files that could not be read or deleted
    pub failed: usize,
    /// Lock files deleted because their record was gone
    pub locks_removed: usize,
}

// == Sweep Expired ==
/// Deletes every expired record in `directory` whose file name ends with
/// `extension`.
///
/// Records are parsed with the same layout the store writes. Files whose
/// expiry line is not an integer are foreign and left alone. Unheld lock
/// files without a record are deleted too. A missing directory is an empty
/// sweep.
pub fn sweep_expired(directory: &Path, extension: &str, now: i64) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let lock_extension = format!("{}{}", extension, LOCK_SUFFIX);

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read directory entry: {}", e);
                report.failed += 1;
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();

        if name.ends_with(&lock_extension) {
            let record_name = &name[..name.len() - LOCK_SUFFIX.len()];
            remove_stale_lock(&directory.join(record_name), &mut report);
            continue;
        }
        if !name.ends_with(extension) {
            continue;
        }
        report.scanned += 1;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), "Failed to read record: {}", e);
                report.failed += 1;
                continue;
            }
        };

        let Some(record) = Record::parse_strict(&bytes) else {
            debug!(path = %path.display(), "Skipping file without expiry header");
            continue;
        };

        if record.is_expired_at(now) {
            match remove_record(&path) {
                Ok(true) => {
                    report.removed += 1;
                    remove_stale_lock(&path, &mut report);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path.display(), "Failed to delete expired record: {}", e);
                    report.failed += 1;
                }
            }
        }
    }

    if report.removed > 0 {
        info!(
            "Expiry sweep: removed {} of {} records in {}",
            report.removed,
            report.scanned,
            directory.display()
        );
    } else {
        debug!("Expiry sweep: no expired records in {}", directory.display());
    }
    Ok(report)
}

fn remove_stale_lock(record: &Path, report: &mut SweepReport) {
    match AdvisoryLocker::remove_stale(record) {
        Ok(true) => report.locks_removed += 1,
        Ok(false) => {}
        Err(e) => {
            warn!(path = %record.display(), "Failed to delete lock file: {}", e);
            report.failed += 1;
        }
    }
}
