//! Value Log Module
//!
//! Append-only storage of the actual key/value bytes, split into segments.
//!
//! ## Responsibilities
//! - Append framed records to the active segment, return their locator
//! - Rotate the active segment by size
//! - Random reads by locator, verified against the record's framed size
//! - Sequential scans of a single segment (used by defragmentation)
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   ├── 00001700000000000001.3f2a9c10   sealed
//!   ├── 00001700000123456789.8be01d77   sealed
//!   └── 00001700000999999999.0c4411fe   active (appends go here)
//! ```

mod iterator;
mod segment;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::SyncPolicy;
use crate::error::{BlockError, Result};
use crate::index::IndexEntry;
use crate::record::{self, Record, HEADER_SIZE};

pub use iterator::SegmentIterator;
pub use segment::{list_segments, new_segment_name, parse_segment_name, SegmentInfo};

use segment::ActiveSegment;

/// The value log
///
/// ## Concurrency:
/// - `active`: one mutex; serializes appends and rotation
/// - `readers`: pooled read handles, independent of the write lock
pub struct ValueLog {
    dir: PathBuf,
    max_segment_size: u64,
    sync_policy: SyncPolicy,

    active: Mutex<ActiveSegment>,

    /// Segment name → shared read handle
    readers: RwLock<HashMap<String, Arc<Mutex<File>>>>,
}

impl ValueLog {
    /// Open the value log in `dir`
    ///
    /// The newest segment still below `max_segment_size` becomes the active
    /// segment; when there is none, a fresh one is created.
    pub fn open(dir: &Path, max_segment_size: u64, sync_policy: SyncPolicy) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let segments = list_segments(dir)?;
        let reusable = segments
            .iter()
            .rev()
            .find(|s| max_segment_size == 0 || s.size < max_segment_size);

        let active = match reusable {
            Some(segment) => {
                debug!(segment = %segment.name, size = segment.size, "Reopening segment for appends");
                ActiveSegment::reopen(dir, &segment.name)?
            }
            None => {
                let active = ActiveSegment::create(dir)?;
                info!(segment = %active.name, "Created segment");
                active
            }
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            max_segment_size,
            sync_policy,
            active: Mutex::new(active),
            readers: RwLock::new(HashMap::new()),
        })
    }

    /// Append a record to the active segment and return its locator
    ///
    /// Rotates first when the record would push a non-empty active segment
    /// past `max_segment_size`.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<IndexEntry> {
        record::check_lengths(key.len(), value.len())?;
        let bytes = record::encode(key, value);

        let mut active = self.active.lock();

        if self.max_segment_size > 0
            && active.size > 0
            && active.size + bytes.len() as u64 > self.max_segment_size
        {
            self.rotate(&mut active)?;
        }

        let offset = active.append(&bytes, self.sync_policy)?;
        Ok(IndexEntry::new(active.name.clone(), offset, bytes.len() as u32))
    }

    /// Seal the active segment and start a new one (active lock held)
    fn rotate(&self, active: &mut ActiveSegment) -> Result<()> {
        let next = ActiveSegment::create(&self.dir)?;
        // The sealed segment is only read from now on
        active.sync()?;
        info!(
            sealed = %active.name,
            sealed_size = active.size,
            segment = %next.name,
            "Rotated segment"
        );
        *active = next;
        Ok(())
    }

    /// Read the record at `offset` in `segment`
    ///
    /// The record's framed size must equal `length`; anything else means the
    /// index disagrees with the value log and is reported as corruption.
    pub fn read_at(&self, segment: &str, offset: u64, length: u32) -> Result<Record> {
        let corrupt = |actual: u32| BlockError::CorruptIndex {
            segment: segment.to_string(),
            offset,
            expected: length,
            actual,
        };

        if (length as usize) < HEADER_SIZE {
            return Err(corrupt(0));
        }

        let handle = self.reader(segment)?;
        let mut file = handle.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; HEADER_SIZE];
        let mut header_read = 0;
        while header_read < HEADER_SIZE {
            match file.read(&mut header[header_read..])? {
                0 => return Err(corrupt(0)),
                n => header_read += n,
            }
        }

        // The body is only allocated once the header agrees with the locator
        let actual = record::framed_len(&header)?;
        if actual != length as usize {
            return Err(corrupt(actual.min(u32::MAX as usize) as u32));
        }

        let mut buf = vec![0u8; actual];
        buf[..HEADER_SIZE].copy_from_slice(&header);
        file.read_exact(&mut buf[HEADER_SIZE..]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                corrupt(0)
            } else {
                BlockError::Io(e)
            }
        })?;

        record::decode(&buf)
    }

    /// Read the record a locator points at
    pub fn read_entry(&self, entry: &IndexEntry) -> Result<Record> {
        self.read_at(&entry.segment, entry.offset, entry.length)
    }

    /// Pooled read handle for a segment
    fn reader(&self, segment: &str) -> Result<Arc<Mutex<File>>> {
        if let Some(handle) = self.readers.read().get(segment) {
            return Ok(Arc::clone(handle));
        }

        // Opened under the write lock; remove_segment holds it across the unlink
        let mut readers = self.readers.write();
        if let Some(handle) = readers.get(segment) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(Mutex::new(File::open(self.dir.join(segment))?));
        readers.insert(segment.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Scan one segment from the start, in physical order
    pub fn scan(&self, segment: &str) -> Result<SegmentIterator> {
        let file = File::open(self.dir.join(segment))?;
        Ok(SegmentIterator::new(file, segment.to_string()))
    }

    /// Delete a sealed segment; returns the bytes freed
    pub fn remove_segment(&self, segment: &str) -> Result<u64> {
        if self.active.lock().name == segment {
            return Err(BlockError::Compaction(format!(
                "refusing to remove active segment {}",
                segment
            )));
        }

        let path = self.dir.join(segment);
        let size = fs::metadata(&path)?.len();
        {
            let mut readers = self.readers.write();
            readers.remove(segment);
            fs::remove_file(&path)?;
        }

        info!(segment, bytes = size, "Removed segment");
        Ok(size)
    }

    /// All segments on disk, oldest first
    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        list_segments(&self.dir)
    }

    /// Name of the segment receiving appends
    pub fn active_segment(&self) -> String {
        self.active.lock().name.clone()
    }

    /// Size of the active segment in bytes
    pub fn active_size(&self) -> u64 {
        self.active.lock().size
    }

    /// Flush the active segment to disk
    pub fn sync(&self) -> Result<()> {
        self.active.lock().sync()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
