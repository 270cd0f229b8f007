//! Index Module
//!
//! The durable key directory: where each key's current record lives.
//!
//! ## Responsibilities
//! - Locator encoding (`IndexEntry`), tombstones as empty locators
//! - Append-only journal of (key, IndexEntry) pairs (`IndexLog`)
//! - Replay on startup (last write wins, tombstone deletes)
//! - Bounded growth through snapshot + buffered continuation compaction
//!
//! ## File Format
//! The index log is a stream of ordinary records (see [`crate::record`])
//! whose value is an encoded `IndexEntry`:
//! ```text
//! ┌──────────────────┬──────────┬─────────────┬──────────┐
//! │ FilenameLen (4)  │ Filename │ Offset (8)  │ Len (4)  │
//! └──────────────────┴──────────┴─────────────┴──────────┘
//! ```

mod entry;
mod log;

use std::collections::HashMap;

pub use entry::{IndexEntry, ENTRY_FIXED_SIZE};
pub use log::{IndexCompaction, IndexLog, ReplayStats, INDEX_FILENAME, INDEX_TEMP_FILENAME};

/// In-memory key directory: key → current locator (never holds tombstones)
pub type KeyDir = HashMap<Vec<u8>, IndexEntry>;
