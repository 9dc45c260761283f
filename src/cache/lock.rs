//! Path Lock Module
//!
//! Exclusive per-path locks with an optional bounded wait. Guards release on
//! drop, so every exit path of a critical section unlocks.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::trace;

use crate::error::{CacheError, Result};

/// Interval between `try_lock` attempts while waiting on an advisory lock.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Suffix of the sidecar file an advisory lock is taken on.
pub const LOCK_SUFFIX: &str = ".lock";

// == Lock Guard ==
/// Held lock on a path; released when dropped.
///
/// The release function receives `true` when the guard is discarded, i.e.
/// the protected record is gone and any lock file may be deleted while the
/// lock is still held.
pub struct LockGuard {
    path: PathBuf,
    release: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl LockGuard {
    pub fn new(path: impl Into<PathBuf>, release: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            path: path.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock and deletes its backing lock file, if any.
    pub fn discard(mut self) {
        if let Some(release) = self.release.take() {
            release(true);
            trace!(path = %self.path.display(), "Lock discarded");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(false);
            trace!(path = %self.path.display(), "Lock released");
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

// == Path Locker ==
/// Serializes access to a file path.
///
/// `wait == None` blocks until the lock is free; `Some(d)` gives up after `d`
/// with [`CacheError::LockTimeout`].
pub trait PathLocker: Send + Sync + fmt::Debug {
    fn acquire(&self, path: &Path, wait: Option<Duration>) -> Result<LockGuard>;
}

// == Advisory Locker ==
/// OS advisory lock on a `<path>.lock` sidecar file.
///
/// Works across processes sharing the directory. A discarded guard deletes
/// its sidecar while still holding the lock; waiters that locked the deleted
/// file notice the path no longer names it and retry on a fresh one.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdvisoryLocker;

impl AdvisoryLocker {
    pub fn lock_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(LOCK_SUFFIX);
        PathBuf::from(name)
    }

    /// Deletes the sidecar of `path` if its record is gone and nobody holds
    /// the lock. Returns whether a sidecar was removed.
    pub fn remove_stale(path: &Path) -> Result<bool> {
        if path.exists() || !Self::lock_path(path).exists() {
            return Ok(false);
        }
        let guard = match AdvisoryLocker.acquire(path, Some(Duration::ZERO)) {
            Ok(guard) => guard,
            Err(CacheError::LockTimeout { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        // Recreated while we waited for the lock
        if path.exists() {
            return Ok(false);
        }
        guard.discard();
        Ok(true)
    }
}

impl PathLocker for AdvisoryLocker {
    fn acquire(&self, path: &Path, wait: Option<Duration>) -> Result<LockGuard> {
        let lock_path = Self::lock_path(path);
        let started = Instant::now();

        loop {
            let file = open_sidecar(&lock_path)?;
            match wait {
                None => file.lock_exclusive()?,
                Some(limit) => try_lock_until(&file, path, started, limit)?,
            }

            if !still_linked(&file, &lock_path)? {
                trace!(path = %path.display(), "Lock file replaced while waiting, retrying");
                continue;
            }
            trace!(path = %path.display(), "Advisory lock acquired");

            return Ok(LockGuard::new(path, move |discard| {
                if discard {
                    let _ = fs::remove_file(&lock_path);
                }
                let _ = FileExt::unlock(&file);
            }));
        }
    }
}

/// Opens (or creates) the sidecar. Falls back to a read-only handle on an
/// existing sidecar when the directory is not writable.
fn open_sidecar(lock_path: &Path) -> io::Result<File> {
    let opened = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path);
    match opened {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => File::open(lock_path),
        other => other,
    }
}

/// True if `lock_path` still names the file `file` was opened from.
#[cfg(unix)]
fn still_linked(file: &File, lock_path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(lock_path) {
        Ok(current) => Ok(current.ino() == held.ino() && current.dev() == held.dev()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// Open files cannot be deleted on other platforms
#[cfg(not(unix))]
fn still_linked(_file: &File, lock_path: &Path) -> io::Result<bool> {
    Ok(lock_path.exists())
}

fn try_lock_until(file: &File, path: &Path, started: Instant, limit: Duration) -> Result<()> {
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(CacheError::LockTimeout {
                        path: path.to_path_buf(),
                        waited,
                    });
                }
                thread::sleep(POLL_INTERVAL.min(limit - waited));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// == Process Locker ==
/// Process-local mutex keyed by path, for single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct ProcessLocker {
    inner: Arc<HeldPaths>,
}

#[derive(Debug, Default)]
struct HeldPaths {
    paths: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl ProcessLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PathLocker for ProcessLocker {
    fn acquire(&self, path: &Path, wait: Option<Duration>) -> Result<LockGuard> {
        let started = Instant::now();
        let mut held = self
            .inner
            .paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while held.contains(path) {
            held = match wait {
                None => self
                    .inner
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        return Err(CacheError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    self.inner
                        .released
                        .wait_timeout(held, limit - waited)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        held.insert(path.to_path_buf());
        drop(held);

        let inner = Arc::clone(&self.inner);
        let owned = path.to_path_buf();
        Ok(LockGuard::new(path, move |_| {
            let mut held = inner.paths.lock().unwrap_or_else(PoisonError::into_inner);
            held.remove(&owned);
            inner.released.notify_all();
        }))
    }
}

// == Lock Strategy ==
/// Which [`PathLocker`] a store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockStrategy {
    /// Cross-process advisory file locks
    #[default]
    Advisory,
    /// In-process mutex keyed by path
    Process,
}

impl LockStrategy {
    pub fn build(self) -> Arc<dyn PathLocker> {
        match self {
            LockStrategy::Advisory => Arc::new(AdvisoryLocker),
            LockStrategy::Process => Arc::new(ProcessLocker::new()),
        }
    }
}

impl FromStr for LockStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" | "file" => Ok(LockStrategy::Advisory),
            "process" | "local" => Ok(LockStrategy::Process),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown lock strategy: {}",
                other
            ))),
        }
    }
}
