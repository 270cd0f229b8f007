//! Record codec
//!
//! Binary framing for a single key/value record. Both the value log and the
//! index log are plain streams of these records.
//!
//! ## Wire Format (big-endian)
//! ```text
//! ┌────────────┬──────────────┬──────────────┬───────────┬─────────────┐
//! │ Magic (2)  │ KeyLen (4)   │ ValueLen (4) │ Key       │ Value       │
//! └────────────┴──────────────┴──────────────┴───────────┴─────────────┘
//! ```

use std::io::Read;

use crate::error::{BlockError, Result};

/// Magic number opening every record
pub const MAGIC: u16 = 0xB10C;

/// Header size: magic (2) + key_len (4) + value_len (4)
pub const HEADER_SIZE: usize = 10;

/// A decoded key/value record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Size of this record once framed
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.key.len(), self.value.len())
    }
}

/// Outcome of reading one record from a stream
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete record
    Record(Record),

    /// Clean end of stream on a record boundary
    End,

    /// The stream ended inside a record (crash mid-append).
    /// `bytes` is how much of the partial record was present.
    TornTail { bytes: usize },
}

/// Framed size for the given key and value lengths
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    HEADER_SIZE + key_len + value_len
}

/// Reject records whose framed size does not fit a u32 locator length
///
/// Covers the per-field length headers too, since each field is smaller
/// than the whole record.
pub fn check_lengths(key_len: usize, value_len: usize) -> Result<()> {
    let total = HEADER_SIZE as u64 + key_len as u64 + value_len as u64;
    if total > u32::MAX as u64 {
        return Err(BlockError::Framing(format!(
            "record of {} bytes (key {}, value {}) exceeds u32 length",
            total, key_len, value_len
        )));
    }
    Ok(())
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a key/value pair into a framed record
///
/// Lengths are assumed to fit in u32 (see [`check_lengths`]).
pub fn encode(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(key.len(), value.len()));
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode the record at the start of `bytes`
///
/// Trailing bytes after the record are ignored; compare
/// [`Record::encoded_len`] with the buffer length to detect them.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    if bytes.len() < HEADER_SIZE {
        return Err(BlockError::Framing(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let (key_len, value_len) = parse_header(&bytes[..HEADER_SIZE])?;

    let total = encoded_len(key_len, value_len);
    if bytes.len() < total {
        return Err(BlockError::Framing(format!(
            "Incomplete record: expected {} bytes, got {}",
            total,
            bytes.len()
        )));
    }

    let key_end = HEADER_SIZE + key_len;
    Ok(Record {
        key: bytes[HEADER_SIZE..key_end].to_vec(),
        value: bytes[key_end..total].to_vec(),
    })
}

/// Read one record from a stream
///
/// Distinguishes a clean end of stream from a torn tail; bad magic is a
/// framing error.
pub fn read_from<R: Read>(reader: &mut R) -> Result<ReadOutcome> {
    let mut header = [0u8; HEADER_SIZE];
    let n = read_full(reader, &mut header)?;
    if n == 0 {
        return Ok(ReadOutcome::End);
    }
    if n < HEADER_SIZE {
        return Ok(ReadOutcome::TornTail { bytes: n });
    }

    let (key_len, value_len) = parse_header(&header)?;
    let body_len = key_len + value_len;

    // Bounded by take(): the length fields are untrusted
    let mut body = Vec::new();
    reader.take(body_len as u64).read_to_end(&mut body)?;
    if body.len() < body_len {
        return Ok(ReadOutcome::TornTail {
            bytes: HEADER_SIZE + body.len(),
        });
    }

    let value = body.split_off(key_len);
    Ok(ReadOutcome::Record(Record { key: body, value }))
}

/// Total framed size announced by a record header
pub fn framed_len(header: &[u8]) -> Result<usize> {
    if header.len() < HEADER_SIZE {
        return Err(BlockError::Framing(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            header.len()
        )));
    }
    let (key_len, value_len) = parse_header(header)?;
    Ok(encoded_len(key_len, value_len))
}

/// Parse and validate a record header, returning (key_len, value_len)
fn parse_header(header: &[u8]) -> Result<(usize, usize)> {
    let magic = u16::from_be_bytes([header[0], header[1]]);
    if magic != MAGIC {
        return Err(BlockError::Framing(format!(
            "Bad magic: expected 0x{:04x}, got 0x{:04x}",
            MAGIC, magic
        )));
    }

    let key_len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    let value_len = u32::from_be_bytes([header[6], header[7], header[8], header[9]]) as usize;
    Ok((key_len, value_len))
}

/// Like `read_exact`, but reports how many bytes were read before EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
