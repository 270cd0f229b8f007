//! Index log
//!
//! Append-only journal of key → locator updates. Replaying it from the start
//! rebuilds the key directory.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncPolicy;
use crate::error::{BlockError, Result};
use crate::record::{self, ReadOutcome};

use super::{IndexEntry, KeyDir};

/// File name of the live index log
pub const INDEX_FILENAME: &str = "blockIndex";

/// File name of the index log being rebuilt by compaction
pub const INDEX_TEMP_FILENAME: &str = "blockIndexTemp";

/// An update captured while a compaction is running
type Update = (Vec<u8>, IndexEntry);

/// Writer side of the index log
///
/// ## Concurrency:
/// Not internally synchronized. The engine keeps it behind the same mutex
/// that orders key directory updates, so log order == commit order.
pub struct IndexLog {
    path: PathBuf,
    temp_path: PathBuf,

    /// Opened in append mode; every record is written with a single call
    file: File,

    /// Bytes of complete records in `file`
    len: u64,

    sync_policy: SyncPolicy,

    /// Set while a compaction is running: appends are also sent here
    side_buffer: Option<Sender<Update>>,
}

/// Result of replaying the index log on startup
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records read, tombstones included
    pub entries: u64,

    /// Tombstone records read
    pub tombstones: u64,

    /// Keys live after the replay
    pub live_keys: usize,

    /// Bytes of a partial trailing record that were cut off
    pub truncated_bytes: u64,
}

/// Result of one index log compaction
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexCompaction {
    /// Entries written from the snapshot (one per live key)
    pub live_keys: usize,

    /// Appends that arrived while the snapshot was being written
    pub buffered_entries: usize,

    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Where a sequential scan stopped
struct ScanEnd {
    valid_len: u64,
    torn_bytes: usize,
}

impl IndexLog {
    /// Open or create the index log in `dir`
    pub fn open(dir: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let path = dir.join(INDEX_FILENAME);
        let temp_path = dir.join(INDEX_TEMP_FILENAME);

        // Compaction died before its rename; the live log is still complete
        if temp_path.exists() {
            warn!(path = %temp_path.display(), "Removing leftover index compaction file");
            fs::remove_file(&temp_path)?;
        }

        let file = open_append(&path, false)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path,
            temp_path,
            file,
            len,
            sync_policy,
            side_buffer: None,
        })
    }

    /// Append a (key, entry) pair
    ///
    /// A failed append is rolled back so the log never keeps a partial or
    /// unacknowledged record.
    pub fn append(&mut self, key: &[u8], entry: &IndexEntry) -> Result<()> {
        let bytes = record::encode(key, &entry.encode());

        if let Err(e) = self.write_durable(&bytes) {
            let _ = self.file.set_len(self.len);
            return Err(e);
        }
        self.len += bytes.len() as u64;

        if let Some(buffer) = &self.side_buffer {
            // Only fails once the compaction gave up; nothing to deliver then
            let _ = buffer.send((key.to_vec(), entry.clone()));
        }
        Ok(())
    }

    fn write_durable(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        if self.sync_policy == SyncPolicy::EveryWrite {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Rebuild the key directory from the start of the log
    ///
    /// A partial trailing record (crash mid-append) is truncated away.
    pub fn replay(&mut self) -> Result<(KeyDir, ReplayStats)> {
        let mut keydir = KeyDir::new();
        let mut stats = ReplayStats::default();

        let end = scan(File::open(&self.path)?, u64::MAX, |key, entry| {
            stats.entries += 1;
            if entry.is_tombstone() {
                stats.tombstones += 1;
                keydir.remove(&key);
            } else {
                keydir.insert(key, entry);
            }
        })?;

        if end.torn_bytes > 0 {
            warn!(
                valid_len = end.valid_len,
                torn_bytes = end.torn_bytes,
                "Truncating partial record at the end of the index log"
            );
            self.file.set_len(end.valid_len)?;
            stats.truncated_bytes = end.torn_bytes as u64;
        }
        self.len = end.valid_len;
        stats.live_keys = keydir.len();

        Ok((keydir, stats))
    }

    /// Open a read-only view of the log as of now: a handle plus the length
    /// of complete records in it.
    ///
    /// The handle stays on the same file even if a compaction later renames a
    /// new log into place.
    pub fn snapshot(&self) -> Result<(File, u64)> {
        Ok((File::open(&self.path)?, self.len))
    }

    /// Fold a snapshot into the final liveness of each key, in key order
    pub fn key_states(file: File, len: u64) -> Result<BTreeMap<Vec<u8>, bool>> {
        let mut states = BTreeMap::new();
        scan(file, len, |key, entry| {
            states.insert(key, !entry.is_tombstone());
        })?;
        Ok(states)
    }

    /// Flush appended records to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Bytes of complete records in the live log
    pub fn size(&self) -> u64 {
        self.len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compacting(&self) -> bool {
        self.side_buffer.is_some()
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Rewrite the log down to one entry per live key.
    ///
    /// 1. Start copying every append into a side buffer (the live log keeps
    ///    receiving them too).
    /// 2. Re-read the log up to the length it had when buffering started.
    /// 3. Write that snapshot to `blockIndexTemp`.
    /// 4. Append whatever the side buffer collected meanwhile.
    /// 5. Rename the temp file over `blockIndex` and append to it from now on.
    ///
    /// The lock is only held for step 1 and for steps 4-5; foreground appends
    /// proceed while the snapshot is read and written.
    pub fn compact(log: &Mutex<IndexLog>) -> Result<IndexCompaction> {
        let (path, temp_path, snapshot_len, updates) = log.lock().begin_compaction()?;
        debug!(snapshot_len, "Index log compaction started");

        let snapshot = write_snapshot(&path, &temp_path, snapshot_len);

        let mut guard = log.lock();
        let result = snapshot.and_then(|(temp, live_keys)| {
            guard
                .finish_compaction(temp, &updates)
                .map(|(buffered_entries, bytes_before, bytes_after)| IndexCompaction {
                    live_keys,
                    buffered_entries,
                    bytes_before,
                    bytes_after,
                })
        });

        match result {
            Ok(stats) => {
                info!(
                    live_keys = stats.live_keys,
                    buffered = stats.buffered_entries,
                    bytes_before = stats.bytes_before,
                    bytes_after = stats.bytes_after,
                    "Index log compacted"
                );
                Ok(stats)
            }
            Err(e) => {
                guard.abort_compaction();
                Err(e)
            }
        }
    }

    fn begin_compaction(&mut self) -> Result<(PathBuf, PathBuf, u64, Receiver<Update>)> {
        if self.side_buffer.is_some() {
            return Err(BlockError::Compaction(
                "index log compaction already in progress".to_string(),
            ));
        }

        let (tx, rx) = channel::unbounded();
        self.side_buffer = Some(tx);
        Ok((self.path.clone(), self.temp_path.clone(), self.len, rx))
    }

    /// Drain buffered updates into the temp file and swap it in.
    /// Returns (buffered entries, bytes before, bytes after).
    fn finish_compaction(
        &mut self,
        temp: File,
        updates: &Receiver<Update>,
    ) -> Result<(usize, u64, u64)> {
        // Appends are blocked by the caller's lock; disconnecting is safe and
        // try_iter still yields everything already sent.
        self.side_buffer = None;

        let mut writer = BufWriter::new(temp);
        let mut buffered = 0;
        for (key, entry) in updates.try_iter() {
            writer.write_all(&record::encode(&key, &entry.encode()))?;
            buffered += 1;
        }
        let temp = writer.into_inner().map_err(|e| BlockError::Io(e.into_error()))?;
        temp.sync_all()?;
        let bytes_after = temp.metadata()?.len();

        fs::rename(&self.temp_path, &self.path)?;

        let bytes_before = self.len;
        self.file = temp;
        self.len = bytes_after;
        Ok((buffered, bytes_before, bytes_after))
    }

    fn abort_compaction(&mut self) {
        self.side_buffer = None;
        if let Err(e) = fs::remove_file(&self.temp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove index compaction file");
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Read (key, entry) pairs from the first `limit` bytes of `reader`
fn scan<R, F>(reader: R, limit: u64, mut apply: F) -> Result<ScanEnd>
where
    R: Read,
    F: FnMut(Vec<u8>, IndexEntry),
{
    let mut reader = BufReader::new(reader.take(limit));
    let mut valid_len = 0u64;

    loop {
        match record::read_from(&mut reader)? {
            ReadOutcome::Record(rec) => {
                valid_len += rec.encoded_len() as u64;
                let entry = IndexEntry::decode(&rec.value)?;
                apply(rec.key, entry);
            }
            ReadOutcome::End => {
                return Ok(ScanEnd {
                    valid_len,
                    torn_bytes: 0,
                })
            }
            ReadOutcome::TornTail { bytes } => {
                return Ok(ScanEnd {
                    valid_len,
                    torn_bytes: bytes,
                })
            }
        }
    }
}

/// Collapse the first `snapshot_len` bytes of the log into a fresh temp
/// file holding one entry per live key (sorted by key).
fn write_snapshot(path: &Path, temp_path: &Path, snapshot_len: u64) -> Result<(File, usize)> {
    let mut live: BTreeMap<Vec<u8>, IndexEntry> = BTreeMap::new();
    scan(File::open(path)?, snapshot_len, |key, entry| {
        if entry.is_tombstone() {
            live.remove(&key);
        } else {
            live.insert(key, entry);
        }
    })?;

    if temp_path.exists() {
        fs::remove_file(temp_path)?;
    }
    let mut writer = BufWriter::new(open_append(temp_path, true)?);
    for (key, entry) in &live {
        writer.write_all(&record::encode(key, &entry.encode()))?;
    }
    let temp = writer.into_inner().map_err(|e| BlockError::Io(e.into_error()))?;

    Ok((temp, live.len()))
}

/// Open a log file for reading and appending
fn open_append(path: &Path, fresh: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).append(true);
    if fresh {
        options.create_new(true);
    } else {
        options.create(true);
    }
    Ok(options.open(path)?)
}
