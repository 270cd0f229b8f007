//! BlockKV CLI
//!
//! Command-line interface operating on a BlockKV data directory in-process.

use std::process::ExitCode;
use std::time::Duration;

use blockkv::{BlockError, Config, StorageEngine, SyncPolicy};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// BlockKV CLI
#[derive(Parser, Debug)]
#[command(name = "blockkv-cli")]
#[command(about = "CLI for the BlockKV embedded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./blockkv_data")]
    data_dir: String,

    /// Segment size in MB before rotation (0 = never rotate)
    #[arg(short = 's', long, default_value = "64")]
    segment_mb: u64,

    /// fsync every append
    #[arg(long)]
    sync: bool,

    /// Minimum age in seconds of a segment before `defrag` rewrites it
    #[arg(short = 'r', long, default_value = "86400")]
    retention_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List keys recorded in the index log
    Range {
        /// Also list deleted keys
        #[arg(long)]
        all: bool,
    },

    /// Rewrite the index log down to live keys
    CompactIndex,

    /// Move live records out of sealed segments and delete them
    Defrag,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blockkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let engine = match StorageEngine::open(config_from(&args)) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.close();

    match outcome.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(BlockError::KeyNotFound) => {
            println!("(not found)");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Store configuration for a one-shot command; timers stay off
fn config_from(args: &Args) -> Config {
    Config::builder()
        .data_dir(&args.data_dir)
        .max_segment_size(args.segment_mb * 1024 * 1024)
        .sync_policy(if args.sync {
            SyncPolicy::EveryWrite
        } else {
            SyncPolicy::None
        })
        .defrag_retention(Duration::from_secs(args.retention_secs))
        .without_background_compaction()
        .build()
}

fn run(engine: &StorageEngine, command: Commands) -> blockkv::Result<()> {
    match command {
        Commands::Get { key } => {
            let value = engine.get(&key)?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Set { key, value } => {
            engine.set(&key, &value)?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(&key)?;
            println!("OK");
        }
        Commands::Range { all } => {
            engine.range(|key, live| {
                if live || all {
                    let marker = if live { "" } else { " (deleted)" };
                    println!("{}{}", String::from_utf8_lossy(key), marker);
                }
                true
            })?;
        }
        Commands::CompactIndex => {
            let stats = engine.compact_index()?;
            println!(
                "live keys: {}, bytes: {} -> {}",
                stats.live_keys, stats.bytes_before, stats.bytes_after
            );
        }
        Commands::Defrag => {
            let stats = engine.defragment()?;
            println!(
                "segments removed: {}/{}, records moved: {}, bytes reclaimed: {}",
                stats.segments_removed,
                stats.segments_scanned,
                stats.records_moved,
                stats.bytes_reclaimed
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_defaults_to_one_day() {
        let args = Args::try_parse_from(["blockkv-cli", "defrag"]).unwrap();
        let config = config_from(&args);
        assert_eq!(config.defrag_retention, Duration::from_secs(86400));
        assert!(config.defrag_interval.is_zero());
    }

    #[test]
    fn test_retention_flag_lets_defrag_reach_recent_segments() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().to_string_lossy().into_owned();
        let args = Args::try_parse_from([
            "blockkv-cli",
            "--data-dir",
            dir.as_str(),
            "--retention-secs",
            "0",
            "defrag",
        ])
        .unwrap();

        let config = config_from(&args);
        assert!(config.defrag_retention.is_zero());

        // Same retention, tiny segments so there is something to sweep
        let engine = StorageEngine::open(Config {
            max_segment_size: 64,
            ..config
        })
        .unwrap();
        engine.set("k", [b'a'; 40]).unwrap();
        engine.set("k", [b'b'; 40]).unwrap();
        assert_eq!(engine.segment_count().unwrap(), 2);

        run(&engine, args.command).unwrap();
        assert_eq!(engine.segment_count().unwrap(), 1);
        assert_eq!(engine.get("k").unwrap(), [b'b'; 40].as_slice());
    }
}
