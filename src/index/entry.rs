//! Index entry (locator)
//!
//! Points at one physical record in the value log.

use crate::error::{BlockError, Result};

/// Fixed part of an encoded entry: filename_len (4) + offset (8) + length (4)
pub const ENTRY_FIXED_SIZE: usize = 16;

/// Locator of a record in the value log
///
/// An empty `segment` marks a tombstone (the key was deleted).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    /// Segment file name, relative to the data directory
    pub segment: String,

    /// Byte offset of the record inside the segment
    pub offset: u64,

    /// Framed size of the record
    pub length: u32,
}

impl IndexEntry {
    pub fn new(segment: impl Into<String>, offset: u64, length: u32) -> Self {
        Self {
            segment: segment.into(),
            offset,
            length,
        }
    }

    /// A tombstone entry
    pub fn tombstone() -> Self {
        Self::default()
    }

    pub fn is_tombstone(&self) -> bool {
        self.segment.is_empty()
    }

    /// True when both entries point at the same physical record.
    ///
    /// Defragmentation only rewrites a scanned record if the key's current
    /// entry is the same as the scanned locator.
    pub fn is_same(&self, other: &IndexEntry) -> bool {
        self.segment == other.segment && self.offset == other.offset && self.length == other.length
    }

    pub fn encoded_len(&self) -> usize {
        ENTRY_FIXED_SIZE + self.segment.len()
    }

    /// Encode as `filename_len:u32, filename, offset:u64, length:u32` (big-endian)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&(self.segment.len() as u32).to_be_bytes());
        buf.extend_from_slice(self.segment.as_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENTRY_FIXED_SIZE {
            return Err(BlockError::Framing(format!(
                "Index entry too short: expected at least {} bytes, got {}",
                ENTRY_FIXED_SIZE,
                bytes.len()
            )));
        }

        let name_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let expected = ENTRY_FIXED_SIZE + name_len;
        if bytes.len() != expected {
            return Err(BlockError::Framing(format!(
                "Index entry length mismatch: expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }

        let name_end = 4 + name_len;
        let segment = std::str::from_utf8(&bytes[4..name_end])
            .map_err(|e| BlockError::Framing(format!("Index entry segment name: {}", e)))?
            .to_string();

        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[name_end..name_end + 8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[name_end + 8..expected]);

        Ok(Self {
            segment,
            offset: u64::from_be_bytes(offset),
            length: u32::from_be_bytes(length),
        })
    }
}
