//! Engine Module
//!
//! The storage engine that coordinates the value log, the index log and the
//! in-memory key directory.
//!
//! ## Responsibilities
//! - Rebuild the key directory from the index log on startup
//! - Order every write: value log → index log → key directory
//! - Serve reads by locator
//! - Own the background compactor

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::compaction::{self, Compactor, DefragStats};
use crate::config::Config;
use crate::error::{BlockError, Result};
use crate::index::{IndexCompaction, IndexEntry, IndexLog, KeyDir};
use crate::vlog::ValueLog;

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Value log appends**: serialized by the value log's active-segment
///   mutex. Only one segment is written at a time.
/// - **Commits** (index log append + key directory update): serialized by
///   the `index_log` mutex, so the journal order is the commit order.
/// - **Reads** (get): read lock on the key directory only, then a pooled
///   segment handle. Reads never wait for value log appends.
///
/// Lock order is always `index_log` → `keydir`.
pub struct StorageEngine {
    core: Arc<EngineCore>,

    /// Background timers (None when both intervals are zero)
    compactor: Option<Compactor>,
}

/// State shared between the engine handle and the compactor thread
pub(crate) struct EngineCore {
    pub(crate) config: Config,

    pub(crate) vlog: ValueLog,

    /// Index log writer; also the commit lock
    index_log: Mutex<IndexLog>,

    /// Current locator of every live key
    keydir: RwLock<KeyDir>,

    /// Keeps on-demand and timer-driven compaction passes from overlapping
    pub(crate) compaction_lock: Mutex<()>,
}

impl StorageEngine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Re-open the newest under-sized segment (or create one)
    /// 3. Replay the index log into the key directory
    /// 4. Start the background compactor
    pub fn open(config: Config) -> Result<Self> {
        let core = Arc::new(EngineCore::open(config)?);
        let compactor = Compactor::start(Arc::clone(&core))?;
        Ok(Self { core, compactor })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Get a value by key
    ///
    /// Deleted and never-written keys are `KeyNotFound`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        self.core.get(key.as_ref())
    }

    /// Put a key-value pair
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.core.set(key.as_ref(), value.as_ref()).map(|_| ())
    }

    /// Put a key-value pair and return the locator it was written at
    pub fn set_located(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<IndexEntry> {
        self.core.set(key.as_ref(), value.as_ref())
    }

    /// Delete a key (writes a tombstone; value bytes are reclaimed later)
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.core.delete(key.as_ref())
    }

    /// Visit every key recorded in the on-disk index log
    ///
    /// Works on a snapshot of the index log file rather than the live key
    /// directory, so writers are not held up. Each key is visited once, in
    /// key order, with whether it is live (`false` = deleted). Return
    /// `false` from `f` to stop early.
    pub fn range<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&[u8], bool) -> bool,
    {
        self.core.range(f)
    }

    /// Current locator of a key
    pub fn locate(&self, key: impl AsRef<[u8]>) -> Option<IndexEntry> {
        self.core.locate(key.as_ref())
    }

    /// Read the value a locator points at
    pub fn read_located(&self, entry: &IndexEntry) -> Result<Bytes> {
        self.core.read_located(entry)
    }

    /// Rewrite `value` for `key` only if the key still points at `expected`
    ///
    /// Returns `false` (and commits nothing) when the key was overwritten or
    /// deleted since `expected` was observed.
    pub fn relocate(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        expected: &IndexEntry,
    ) -> Result<bool> {
        self.core.relocate(key.as_ref(), value.as_ref(), expected)
    }

    /// Run one index log compaction now
    pub fn compact_index(&self) -> Result<IndexCompaction> {
        self.core.compact_index()
    }

    /// Run one defragmentation sweep now
    pub fn defragment(&self) -> Result<DefragStats> {
        compaction::defragment(&self.core)
    }

    /// Flush both logs to disk
    pub fn sync(&self) -> Result<()> {
        self.core.sync()
    }

    /// Close the engine gracefully
    ///
    /// Stops background compaction and syncs both logs
    pub fn close(mut self) -> Result<()> {
        if let Some(mut compactor) = self.compactor.take() {
            compactor.shutdown();
        }
        self.core.sync()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.core.keydir.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.core.config.data_dir
    }

    /// Name of the segment receiving appends
    pub fn active_segment(&self) -> String {
        self.core.vlog.active_segment()
    }

    /// Number of segment files on disk
    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.core.vlog.segments()?.len())
    }

    /// Bytes of complete records in the index log
    pub fn index_log_size(&self) -> u64 {
        self.core.index_log.lock().size()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.core.config
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Some(mut compactor) = self.compactor.take() {
            compactor.shutdown();
        }
    }
}

impl EngineCore {
    fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let vlog = ValueLog::open(&config.data_dir, config.max_segment_size, config.sync_policy)?;

        let mut index_log = IndexLog::open(&config.data_dir, config.sync_policy)?;
        let (keydir, stats) = index_log.replay()?;

        info!(
            data_dir = %config.data_dir.display(),
            active_segment = %vlog.active_segment(),
            entries = stats.entries,
            tombstones = stats.tombstones,
            live_keys = stats.live_keys,
            truncated_bytes = stats.truncated_bytes,
            "Engine opened"
        );

        Ok(Self {
            config,
            vlog,
            index_log: Mutex::new(index_log),
            keydir: RwLock::new(keydir),
            compaction_lock: Mutex::new(()),
        })
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Bytes> {
        let entry = self.locate(key).ok_or(BlockError::KeyNotFound)?;

        match self.read_located(&entry) {
            // Defragmentation may have moved the key and removed the segment
            // between the lookup and the read: resolve once more.
            Err(e) if e.is_missing_file() => match self.locate(key) {
                Some(moved) if !moved.is_same(&entry) => self.read_located(&moved),
                Some(_) => Err(e),
                None => Err(BlockError::KeyNotFound),
            },
            other => other,
        }
    }

    /// Value log append, then commit
    pub(crate) fn set(&self, key: &[u8], value: &[u8]) -> Result<IndexEntry> {
        let entry = self.vlog.append(key, value)?;
        self.commit(key, &entry)?;
        Ok(entry)
    }

    pub(crate) fn delete(&self, key: &[u8]) -> Result<()> {
        self.commit(key, &IndexEntry::tombstone())
    }

    /// Index log append, then key directory update, under the commit lock.
    /// The key directory is untouched if the append fails.
    fn commit(&self, key: &[u8], entry: &IndexEntry) -> Result<()> {
        let mut index_log = self.index_log.lock();
        index_log.append(key, entry)?;

        let mut keydir = self.keydir.write();
        if entry.is_tombstone() {
            keydir.remove(key);
        } else {
            keydir.insert(key.to_vec(), entry.clone());
        }
        Ok(())
    }

    pub(crate) fn relocate(&self, key: &[u8], value: &[u8], expected: &IndexEntry) -> Result<bool> {
        let entry = self.vlog.append(key, value)?;

        // Checked under the commit lock: no write can land between the check
        // and the commit. A lost race leaves `entry` as an orphan record.
        let mut index_log = self.index_log.lock();
        let still_current = self
            .keydir
            .read()
            .get(key)
            .map_or(false, |current| current.is_same(expected));
        if !still_current {
            return Ok(false);
        }

        index_log.append(key, &entry)?;
        self.keydir.write().insert(key.to_vec(), entry);
        Ok(true)
    }

    pub(crate) fn locate(&self, key: &[u8]) -> Option<IndexEntry> {
        self.keydir.read().get(key).cloned()
    }

    pub(crate) fn read_located(&self, entry: &IndexEntry) -> Result<Bytes> {
        if entry.is_tombstone() {
            return Err(BlockError::KeyNotFound);
        }
        let record = self.vlog.read_entry(entry)?;
        Ok(Bytes::from(record.value))
    }

    pub(crate) fn range<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], bool) -> bool,
    {
        let (file, len) = self.index_log.lock().snapshot()?;
        for (key, live) in IndexLog::key_states(file, len)? {
            if !f(&key, live) {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn compact_index(&self) -> Result<IndexCompaction> {
        let _guard = self.compaction_lock.lock();
        IndexLog::compact(&self.index_log)
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.vlog.sync()?;
        self.index_log.lock().sync()
    }
}
