//! File Cache - command line front end
//!
//! Reads and writes entries of a cache directory and runs expiry sweeps.
//! Configuration comes from environment variables (see `Config::from_env`),
//! overridable with `--dir` and `--ext`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_cache::{spawn_sweep_task, Config, FileCache, Value, ValueCodec};

/// Command line interface for the file cache
#[derive(Parser, Debug)]
#[command(name = "file_cache")]
#[command(about = "Filesystem-backed key/value cache with TTL expiry")]
#[command(version)]
struct Cli {
    /// Cache directory (overrides CACHE_DIR)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Record file extension (overrides CACHE_FILE_EXTENSION)
    #[arg(long, global = true)]
    ext: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the JSON value stored under a key
    Get { key: String },
    /// Store a JSON value under a key
    Set {
        key: String,
        /// Value as JSON, e.g. '{"a": 1}'
        value: String,
        /// Time to live in seconds; omit for no expiry
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Delete the entry for a key
    Remove { key: String },
    /// Delete expired entries once and print a report
    Sweep,
    /// Sweep periodically until interrupted
    Watch {
        /// Seconds between sweeps (defaults to CACHE_SWEEP_INTERVAL, else 60)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.dir {
        config.directory = dir;
    }
    if let Some(ext) = cli.ext {
        config.file_extension = ext;
    }

    let cache = FileCache::open(&config, ValueCodec::default())
        .with_context(|| format!("opening cache in {}", config.directory.display()))?;

    match cli.command {
        Command::Get { key } => match cache.fetch(&key, None) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value.to_json()?)?),
            None => bail!("no entry for key {:?}", key),
        },
        Command::Set { key, value, ttl } => {
            let json: serde_json::Value =
                serde_json::from_str(&value).context("value must be valid JSON")?;
            let value = Value::from_json(json)?;
            if !cache.store(&key, &value, ttl)? {
                bail!("failed to write entry for key {:?}", key);
            }
        }
        Command::Remove { key } => {
            if !cache.remove(&key) {
                bail!("no entry for key {:?}", key);
            }
        }
        Command::Sweep => {
            let report = cache.sweep()?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::Watch { interval } => {
            let interval = interval
                .or((config.sweep_interval > 0).then_some(config.sweep_interval))
                .unwrap_or(60);
            let handle = spawn_sweep_task(Arc::new(cache), interval);
            shutdown_signal().await;
            handle.abort();
            warn!("Sweep task aborted");
        }
    }

    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
