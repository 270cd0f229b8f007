//! Segment files
//!
//! Naming, discovery and the writable (active) segment.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::config::SyncPolicy;
use crate::error::Result;
use crate::record::{self, ReadOutcome};

/// A segment file found on disk
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// File name relative to the data directory
    pub name: String,

    /// Creation timestamp encoded in the name (unix nanos)
    pub timestamp: u64,

    /// Current file size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,
}

impl SegmentInfo {
    /// True when the file has not been modified for at least `age`
    pub fn older_than(&self, age: Duration) -> bool {
        if age.is_zero() {
            return true;
        }
        match self.modified.elapsed() {
            Ok(elapsed) => elapsed >= age,
            // Modified "in the future" (clock skew): treat as fresh
            Err(_) => false,
        }
    }
}

/// Generate a new segment name: `<unix nanos>.<random hex>`
pub fn new_segment_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    format!("{:020}.{:08x}", nanos, rand::random::<u32>())
}

/// Parse the timestamp out of a segment name
/// "00001700000000000000.1a2b3c4d" → Some(1700000000000000)
pub fn parse_segment_name(name: &str) -> Option<u64> {
    let (timestamp, suffix) = name.split_once('.')?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if timestamp.is_empty() || !timestamp.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    timestamp.parse().ok()
}

/// Discover segment files in `dir`, oldest first
///
/// Anything not named like a segment (index log files included) is ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<SegmentInfo>> {
    let mut segments = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(timestamp) = parse_segment_name(&name) {
            segments.push(SegmentInfo {
                name,
                timestamp,
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }
    }

    segments.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
    Ok(segments)
}

/// The segment currently receiving appends
pub(crate) struct ActiveSegment {
    pub name: String,

    /// Opened in append mode
    file: File,

    /// Bytes of complete records
    pub size: u64,
}

impl ActiveSegment {
    /// Create a brand-new empty segment
    pub fn create(dir: &Path) -> Result<Self> {
        let name = new_segment_name();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(dir.join(&name))?;

        Ok(Self {
            name,
            file,
            size: 0,
        })
    }

    /// Re-open an existing segment for appending
    ///
    /// A partial record at the end (crash mid-append) is truncated so new
    /// records start on a record boundary.
    pub fn reopen(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new().read(true).append(true).open(&path)?;

        let mut reader = BufReader::new(File::open(&path)?);
        reader.seek(SeekFrom::Start(0))?;
        let mut valid_len = 0u64;
        loop {
            match record::read_from(&mut reader)? {
                ReadOutcome::Record(rec) => valid_len += rec.encoded_len() as u64,
                ReadOutcome::End => break,
                ReadOutcome::TornTail { bytes } => {
                    warn!(
                        segment = name,
                        valid_len,
                        torn_bytes = bytes,
                        "Truncating partial record at the end of segment"
                    );
                    file.set_len(valid_len)?;
                    break;
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            file,
            size: valid_len,
        })
    }

    /// Append one framed record; returns the offset it was written at
    ///
    /// A failed write is rolled back to the previous size.
    pub fn append(&mut self, bytes: &[u8], sync_policy: SyncPolicy) -> Result<u64> {
        let offset = self.size;

        let written = self.file.write_all(bytes).and_then(|_| {
            if sync_policy == SyncPolicy::EveryWrite {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            let _ = self.file.set_len(offset);
            return Err(e.into());
        }

        self.size += bytes.len() as u64;
        Ok(offset)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
