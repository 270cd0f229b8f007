//! Configuration for BlockKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BlockError, Result};

/// Main configuration for a BlockKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── <timestamp>.<random>   (value-log segments)
    ///     ├── blockIndex             (index log)
    ///     └── blockIndexTemp         (only while the index log is compacted)
    pub data_dir: PathBuf,

    /// Segment size (bytes) at which the active segment is rotated.
    /// 0 disables rotation.
    pub max_segment_size: u64,

    /// When to fsync appends to either log
    pub sync_policy: SyncPolicy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// How often the index log is rewritten down to live keys.
    /// `Duration::ZERO` disables the timer.
    pub index_compact_interval: Duration,

    /// How often sealed segments are swept for live records.
    /// `Duration::ZERO` disables the timer.
    pub defrag_interval: Duration,

    /// Segments modified more recently than this are left alone by the sweep
    pub defrag_retention: Duration,
}

/// Fsync policy for log appends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Leave flushing to the OS page cache. A crash can lose the most
    /// recent appends; they are never half-visible.
    None,

    /// fsync after every append (safest, slowest)
    EveryWrite,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blockkv_data"),
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            sync_policy: SyncPolicy::None,
            index_compact_interval: Duration::from_secs(10 * 60),
            defrag_interval: Duration::from_secs(60 * 60),
            defrag_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(BlockError::Config("data_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the segment rotation threshold (in bytes, 0 = never rotate)
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    /// Set the fsync policy
    pub fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.config.sync_policy = policy;
        self
    }

    /// Set the index-log compaction interval
    pub fn index_compact_interval(mut self, interval: Duration) -> Self {
        self.config.index_compact_interval = interval;
        self
    }

    /// Set the defragmentation sweep interval
    pub fn defrag_interval(mut self, interval: Duration) -> Self {
        self.config.defrag_interval = interval;
        self
    }

    /// Set the minimum age of a segment before the sweep may rewrite it
    pub fn defrag_retention(mut self, retention: Duration) -> Self {
        self.config.defrag_retention = retention;
        self
    }

    /// Disable both background timers (compaction then only runs on demand)
    pub fn without_background_compaction(mut self) -> Self {
        self.config.index_compact_interval = Duration::ZERO;
        self.config.defrag_interval = Duration::ZERO;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
