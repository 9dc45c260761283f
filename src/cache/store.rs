//! Cache Store Module
//!
//! File-backed cache engine: one record file per key, guarded by a per-path
//! lock around each read or write, with TTL expiry applied on fetch.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::key;
use crate::cache::lock::PathLocker;
use crate::cache::record::{current_timestamp, remove_record, Record};
use crate::cache::sweep::{sweep_expired, SweepReport};
use crate::cache::{Value, ValueCodec};
use crate::config::Config;
use crate::error::{CacheError, Result};

/// Permissions of a cache directory created by the store.
pub const DIRECTORY_MODE: u32 = 0o750;

// == File Cache ==
/// Filesystem-backed cache shareable across processes.
///
/// Holds no state beyond its configuration; every call goes to disk.
#[derive(Debug)]
pub struct FileCache {
    /// Directory holding the record files
    directory: PathBuf,
    /// Suffix of record files
    extension: String,
    /// Bound on lock acquisition
    lock_timeout: Option<Duration>,
    /// Payload encoder/decoder
    codec: ValueCodec,
    /// Per-path lock implementation
    locker: Arc<dyn PathLocker>,
}

impl FileCache {
    // == Constructor ==
    /// Opens the cache described by `config`.
    ///
    /// Creates the directory if needed and deletes records that have already
    /// expired before returning.
    pub fn open(config: &Config, codec: ValueCodec) -> Result<Self> {
        Self::with_locker(config, codec, config.lock_strategy.build())
    }

    /// Like [`FileCache::open`] with an explicit lock implementation.
    pub fn with_locker(
        config: &Config,
        codec: ValueCodec,
        locker: Arc<dyn PathLocker>,
    ) -> Result<Self> {
        create_directory(&config.directory)?;

        let cache = Self {
            directory: config.directory.clone(),
            extension: config.file_extension.clone(),
            lock_timeout: config.lock_timeout,
            codec,
            locker,
        };
        cache.sweep()?;
        Ok(cache)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Record file used for `key`.
    pub fn path_for(&self, key: impl AsRef<[u8]>) -> PathBuf {
        self.directory
            .join(format!("{}{}", key::encode(key), self.extension))
    }

    // == Supported ==
    /// True if the cache directory exists and this process may write to it.
    pub fn is_supported(&self) -> bool {
        self.directory.is_dir() && is_writable(&self.directory)
    }

    // == Fetch ==
    /// Retrieves the value stored under `key`.
    ///
    /// # Arguments
    /// * `key` - Cache key, any byte string
    /// * `_ttl_hint` - Accepted for interface symmetry; the stored expiry governs
    ///
    /// # Returns
    /// `None` for a missing, expired, unreadable or empty record. Expired
    /// records are deleted after the lock is released.
    pub fn fetch(&self, key: impl AsRef<[u8]>, _ttl_hint: Option<i64>) -> Option<Value> {
        let path = self.path_for(&key);
        if !path.exists() {
            debug!(path = %path.display(), "Cache miss");
            return None;
        }

        let bytes = {
            let guard = match self.locker.acquire(&path, self.lock_timeout) {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(path = %path.display(), "Treating record as miss: {}", e);
                    return None;
                }
            };
            match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    guard.discard();
                    return None;
                }
                Err(e) => {
                    warn!(path = %path.display(), "Failed to read record: {}", e);
                    return None;
                }
            }
        };

        let record = Record::deserialize(&bytes);
        if record.is_expired() {
            // Concurrent fetches may race to delete the same record
            match remove_record(&path) {
                Ok(_) => self.discard_lock(&path),
                Err(e) => warn!(path = %path.display(), "Failed to delete expired record: {}", e),
            }
            debug!(path = %path.display(), "Cache miss (expired)");
            return None;
        }

        debug!(path = %path.display(), "Cache hit");
        self.codec.decode(&record.payload)
    }

    /// Fetches and deserializes into `T`; `None` on a miss or a shape mismatch.
    pub fn fetch_as<T: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> Option<T> {
        self.fetch(key, None)?.deserialize_into().ok()
    }

    // == Store ==
    /// Stores `value` under `key`, replacing any previous record.
    ///
    /// # Arguments
    /// * `key` - Cache key, any byte string
    /// * `value` - Value to encode and persist
    /// * `ttl` - Seconds until expiry; `None` never expires, negative is already expired
    ///
    /// # Returns
    /// `Ok(false)` when the write fails. Values the codec cannot represent
    /// and lock timeouts are errors; neither touches the record.
    pub fn store(&self, key: impl AsRef<[u8]>, value: &Value, ttl: Option<i64>) -> Result<bool> {
        let path = self.path_for(&key);
        let payload = self.codec.encode(value)?;

        let _guard = match self.locker.acquire(&path, self.lock_timeout) {
            Ok(guard) => guard,
            Err(CacheError::Io(e)) => {
                warn!(path = %path.display(), "Failed to lock record: {}", e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let record = Record::new(payload, ttl, current_timestamp());
        match fs::write(&path, record.serialize()) {
            Ok(()) => {
                debug!(path = %path.display(), expires_at = record.expires_at, "Stored record");
                Ok(true)
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to write record: {}", e);
                Ok(false)
            }
        }
    }

    /// Serializes `value` with serde and stores it.
    ///
    /// # Arguments
    /// * `key` - Cache key, any byte string
    /// * `value` - Any serde-serializable value; `None`/unit is rejected
    /// * `ttl` - Seconds until expiry; `None` never expires
    pub fn store_serialize<T: Serialize + ?Sized>(
        &self,
        key: impl AsRef<[u8]>,
        value: &T,
        ttl: Option<i64>,
    ) -> Result<bool> {
        self.store(key, &Value::from_serialize(value)?, ttl)
    }

    // == Remove ==
    /// Deletes the record for `key` and its lock file. Returns whether a
    /// record was removed.
    pub fn remove(&self, key: impl AsRef<[u8]>) -> bool {
        let path = self.path_for(&key);
        if !path.exists() {
            return false;
        }

        let guard = match self.locker.acquire(&path, self.lock_timeout) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(path = %path.display(), "Failed to lock record for removal: {}", e);
                return false;
            }
        };
        match remove_record(&path) {
            Ok(removed) => {
                guard.discard();
                removed
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to delete record: {}", e);
                false
            }
        }
    }

    // == Sweep ==
    /// Deletes every expired record in the directory, and lock files left
    /// behind by records that no longer exist.
    pub fn sweep(&self) -> Result<SweepReport> {
        sweep_expired(&self.directory, &self.extension, current_timestamp())
    }

    /// Drops the lock file of a deleted record unless another caller holds
    /// the lock or has written the record again.
    fn discard_lock(&self, path: &Path) {
        if let Ok(guard) = self.locker.acquire(path, Some(Duration::ZERO)) {
            if !path.exists() {
                guard.discard();
            }
        }
    }
}

#[cfg(unix)]
fn is_writable(directory: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    access(directory, AccessFlags::W_OK | AccessFlags::X_OK).is_ok()
}

#[cfg(not(unix))]
fn is_writable(directory: &Path) -> bool {
    fs::metadata(directory)
        .map(|meta| !meta.permissions().readonly())
        .unwrap_or(false)
}

fn create_directory(directory: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIRECTORY_MODE);
    }
    builder.create(directory)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AdvisoryLocker, Fields, ProcessLocker, TypeRegistry};
    use std::thread::sleep;
    use tempfile::{tempdir, TempDir};

    fn open_store() -> (TempDir, FileCache) {
        let dir = tempdir().unwrap();
        let config = Config::default().with_directory(dir.path().join("store"));
        let cache = FileCache::open(&config, ValueCodec::new(TypeRegistry::new())).unwrap();
        (dir, cache)
    }

    fn record_count(cache: &FileCache) -> usize {
        fs::read_dir(cache.directory())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".cache"))
            .count()
    }

    #[test]
    fn test_open_creates_directory() {
        let (_dir, cache) = open_store();
        assert!(cache.directory().is_dir());
        assert!(cache.is_supported());
    }

    #[cfg(unix)]
    #[test]
    fn test_open_directory_mode() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, cache) = open_store();
        let mode = fs::metadata(cache.directory()).unwrap().permissions().mode();
        // umask can only clear bits
        assert_eq!(mode & 0o777 & !DIRECTORY_MODE, 0);
    }

    #[test]
    fn test_is_supported_false_without_directory() {
        let (_dir, cache) = open_store();
        fs::remove_dir_all(cache.directory()).unwrap();
        assert!(!cache.is_supported());
    }

    #[cfg(unix)]
    #[test]
    fn test_is_supported_false_for_unwritable_directory() {
        use std::os::unix::fs::PermissionsExt;

        // Root bypasses permission bits
        if nix::unistd::geteuid().is_root() {
            return;
        }

        let (_dir, cache) = open_store();
        fs::set_permissions(cache.directory(), fs::Permissions::from_mode(0o555)).unwrap();
        let supported = cache.is_supported();
        fs::set_permissions(cache.directory(), fs::Permissions::from_mode(0o750)).unwrap();

        assert!(!supported);
    }

    #[test]
    fn test_codec_accessor_shares_registry() {
        let dir = tempdir().unwrap();
        let mut registry = TypeRegistry::new();
        registry.register_with("Point", |fields| Some(fields.clone()));
        let config = Config::default().with_directory(dir.path());
        let cache = FileCache::open(&config, ValueCodec::new(registry)).unwrap();

        assert!(cache.codec().registry().contains("Point"));
        assert!(!cache.codec().registry().contains("Line"));
    }

    #[test]
    fn test_store_and_fetch() {
        let (_dir, cache) = open_store();
        assert!(cache.store("key1", &Value::from("value1"), None).unwrap());
        assert_eq!(cache.fetch("key1", None), Some(Value::from("value1")));
    }

    #[test]
    fn test_fetch_nonexistent_touches_nothing() {
        let (_dir, cache) = open_store();
        assert_eq!(cache.fetch("nonexistent", None), None);
        assert_eq!(fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[test]
    fn test_path_for_encodes_key() {
        let (_dir, cache) = open_store();
        let path = cache.path_for("a/b c");
        assert_eq!(path.file_name().unwrap(), "a%2fb%20c.cache");
        assert_eq!(path.parent().unwrap(), cache.directory());
    }

    #[test]
    fn test_store_writes_record_layout() {
        let (_dir, cache) = open_store();
        cache.store("b", &Value::from("x"), None).unwrap();
        let contents = fs::read_to_string(cache.path_for("b")).unwrap();
        assert_eq!(contents, "0\nt=string&v=x");
    }

    #[test]
    fn test_store_overwrite() {
        let (_dir, cache) = open_store();
        cache.store("k", &Value::Int(1), None).unwrap();
        cache.store("k", &Value::Int(2), None).unwrap();
        assert_eq!(cache.fetch("k", None), Some(Value::Int(2)));
        assert_eq!(record_count(&cache), 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let (_dir, cache) = open_store();
        cache.store("a", &Value::Int(1), Some(1)).unwrap();
        assert_eq!(cache.fetch("a", None), Some(Value::Int(1)));

        // Expiry has one-second resolution and is exclusive
        sleep(Duration::from_millis(2100));

        assert_eq!(cache.fetch("a", None), None);
        assert!(!cache.path_for("a").exists());
    }

    #[test]
    fn test_store_negative_ttl_is_expired() {
        let (_dir, cache) = open_store();
        assert!(cache.store("gone", &Value::Int(1), Some(-10)).unwrap());
        assert_eq!(cache.fetch("gone", None), None);
        assert!(!cache.path_for("gone").exists());
    }

    #[test]
    fn test_store_unsupported_keeps_prior_record() {
        let (_dir, cache) = open_store();
        cache.store("k", &Value::Int(7), None).unwrap();

        let result = cache.store("k", &Value::Float(f64::NAN), None);
        assert!(matches!(result, Err(CacheError::UnsupportedValueKind(_))));
        assert_eq!(cache.fetch("k", None), Some(Value::Int(7)));
    }

    #[test]
    fn test_store_into_vanished_directory_returns_false() {
        let (_dir, cache) = open_store();
        fs::remove_dir_all(cache.directory()).unwrap();
        assert!(!cache.store("k", &Value::Int(1), None).unwrap());
    }

    #[test]
    fn test_fetch_empty_record_is_miss() {
        let (_dir, cache) = open_store();
        fs::write(cache.path_for("empty"), "").unwrap();
        assert_eq!(cache.fetch("empty", None), None);
    }

    #[test]
    fn test_composite_value() {
        let (_dir, cache) = open_store();
        let mut fields = Fields::new();
        fields.insert("a".to_string(), Value::Int(1));
        fields.insert("b".to_string(), Value::from(vec![2, 3]));
        let value = Value::Map(fields);

        cache.store("cfg", &value, None).unwrap();
        assert_eq!(cache.fetch("cfg", None), Some(value));
    }

    #[test]
    fn test_store_serialize_and_fetch_as() {
        let (_dir, cache) = open_store();
        let numbers = vec![1i64, 2, 3];
        assert!(cache.store_serialize("nums", &numbers, Some(60)).unwrap());
        assert_eq!(cache.fetch_as::<Vec<i64>>("nums"), Some(numbers));
        assert_eq!(cache.fetch_as::<String>("nums"), None);
    }

    #[test]
    fn test_remove() {
        let (_dir, cache) = open_store();
        cache.store("k", &Value::Bool(true), None).unwrap();
        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert_eq!(cache.fetch("k", None), None);
    }

    #[test]
    fn test_remove_deletes_lock_file() {
        let (_dir, cache) = open_store();
        cache.store("k", &Value::Int(1), None).unwrap();
        assert!(AdvisoryLocker::lock_path(&cache.path_for("k")).exists());

        assert!(cache.remove("k"));
        assert_eq!(fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[test]
    fn test_expired_fetch_deletes_lock_file() {
        let (_dir, cache) = open_store();
        cache.store("gone", &Value::Int(1), Some(-1)).unwrap();

        assert_eq!(cache.fetch("gone", None), None);
        assert_eq!(fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[test]
    fn test_directory_empty_after_all_records_removed() {
        let (_dir, cache) = open_store();
        for i in 0..50 {
            let key = format!("key-{}", i);
            cache.store(&key, &Value::Int(i), Some(-1)).unwrap();
            assert_eq!(cache.fetch(&key, None), None);
        }
        cache.store("last", &Value::from("x"), None).unwrap();
        assert!(cache.remove("last"));
        cache.sweep().unwrap();

        assert_eq!(fs::read_dir(cache.directory()).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_deletes_lock_files_of_expired_records() {
        let (_dir, cache) = open_store();
        cache.store("a", &Value::Int(1), Some(-5)).unwrap();
        cache.store("b", &Value::Int(2), None).unwrap();

        let report = cache.sweep().unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.locks_removed, 1);
        assert!(!AdvisoryLocker::lock_path(&cache.path_for("a")).exists());
        assert!(AdvisoryLocker::lock_path(&cache.path_for("b")).exists());
    }

    #[test]
    fn test_open_sweeps_expired_records() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.cache"), "100\nt=integer&v=1").unwrap();
        fs::write(dir.path().join("keep.cache"), "0\nt=integer&v=2").unwrap();

        let config = Config::default().with_directory(dir.path());
        let cache = FileCache::open(&config, ValueCodec::default()).unwrap();

        assert!(!dir.path().join("old.cache").exists());
        assert_eq!(cache.fetch("keep", None), Some(Value::Int(2)));
    }

    #[test]
    fn test_custom_extension() {
        let dir = tempdir().unwrap();
        let config = Config::from_options([
            ("directory", dir.path().to_string_lossy().into_owned()),
            ("fileExtension", ".pev".to_string()),
        ]);
        let cache = FileCache::open(&config, ValueCodec::default()).unwrap();
        cache.store("k", &Value::Int(1), None).unwrap();
        assert!(dir.path().join("k.pev").exists());
    }

    #[test]
    fn test_lock_timeout_surfaces_on_store_and_misses_on_fetch() {
        let dir = tempdir().unwrap();
        let mut config = Config::default().with_directory(dir.path());
        config.lock_timeout = Some(Duration::from_millis(30));
        let locker = ProcessLocker::new();
        let cache =
            FileCache::with_locker(&config, ValueCodec::default(), Arc::new(locker.clone()))
                .unwrap();
        cache.store("k", &Value::Int(1), None).unwrap();

        let _held = locker.acquire(&cache.path_for("k"), None).unwrap();
        assert!(matches!(
            cache.store("k", &Value::Int(2), None),
            Err(CacheError::LockTimeout { .. })
        ));
        assert_eq!(cache.fetch("k", None), None);
    }
}
