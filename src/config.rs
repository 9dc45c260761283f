//! Configuration Module
//!
//! Handles loading cache configuration from environment variables or from an
//! option list.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::cache::LockStrategy;

/// Default storage directory, relative to the working directory.
pub const DEFAULT_DIRECTORY: &str = "storage";

/// Default suffix of record files.
pub const DEFAULT_FILE_EXTENSION: &str = ".cache";

/// Default bound on lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// File cache configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one record file per key
    pub directory: PathBuf,
    /// Suffix appended to every record file name
    pub file_extension: String,
    /// Longest wait for a per-key lock; `None` waits indefinitely
    pub lock_timeout: Option<Duration>,
    /// Lock implementation
    pub lock_strategy: LockStrategy,
    /// Periodic sweep interval in seconds, 0 disables it
    pub sweep_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIR` - Storage directory (default: `storage`)
    /// - `CACHE_FILE_EXTENSION` - Record suffix (default: `.cache`)
    /// - `CACHE_LOCK_TIMEOUT_MS` - Lock wait bound, 0 = unbounded (default: 10000)
    /// - `CACHE_LOCK_STRATEGY` - `advisory` or `process` (default: `advisory`)
    /// - `CACHE_SWEEP_INTERVAL` - Periodic sweep in seconds (default: 0, disabled)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            directory: env::var("CACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
            file_extension: env::var("CACHE_FILE_EXTENSION")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.file_extension),
            lock_timeout: env::var("CACHE_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|ms| (ms > 0).then(|| Duration::from_millis(ms)))
                .unwrap_or(defaults.lock_timeout),
            lock_strategy: env::var("CACHE_LOCK_STRATEGY")
                .ok()
                .and_then(|v| match v.parse() {
                    Ok(strategy) => Some(strategy),
                    Err(e) => {
                        warn!("Ignoring CACHE_LOCK_STRATEGY: {}", e);
                        None
                    }
                })
                .unwrap_or(defaults.lock_strategy),
            sweep_interval: env::var("CACHE_SWEEP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Builds a Config from name/value options.
    ///
    /// Recognizes `directory` and `fileExtension` (or `file_extension`);
    /// unrecognized names are ignored.
    pub fn from_options<I, K, V>(options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        for (name, value) in options {
            match name.as_ref() {
                "directory" => config.directory = PathBuf::from(value.into()),
                "fileExtension" | "file_extension" => config.file_extension = value.into(),
                _ => {}
            }
        }
        config
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            lock_strategy: LockStrategy::Advisory,
            sweep_interval: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.directory, PathBuf::from("storage"));
        assert_eq!(config.file_extension, ".cache");
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.lock_strategy, LockStrategy::Advisory);
        assert_eq!(config.sweep_interval, 0);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_DIR");
        env::remove_var("CACHE_FILE_EXTENSION");
        env::remove_var("CACHE_LOCK_TIMEOUT_MS");
        env::remove_var("CACHE_LOCK_STRATEGY");
        env::remove_var("CACHE_SWEEP_INTERVAL");

        let config = Config::from_env();
        assert_eq!(config.directory, PathBuf::from("storage"));
        assert_eq!(config.file_extension, ".cache");
        assert_eq!(config.lock_timeout, Some(DEFAULT_LOCK_TIMEOUT));
        assert_eq!(config.lock_strategy, LockStrategy::Advisory);
        assert_eq!(config.sweep_interval, 0);
    }

    #[test]
    fn test_config_from_options() {
        let config = Config::from_options([
            ("directory", "/var/cache/app"),
            ("fileExtension", ".pev"),
            ("unknown", "ignored"),
        ]);
        assert_eq!(config.directory, PathBuf::from("/var/cache/app"));
        assert_eq!(config.file_extension, ".pev");
        assert_eq!(config.lock_timeout, Some(DEFAULT_LOCK_TIMEOUT));
    }

    #[test]
    fn test_config_from_options_empty() {
        let config = Config::from_options(Vec::<(String, String)>::new());
        assert_eq!(config.file_extension, DEFAULT_FILE_EXTENSION);
    }
}
