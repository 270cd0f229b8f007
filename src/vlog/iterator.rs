//! Segment Iterator
//!
//! Sequential iteration over all records in one segment, in physical order.

use std::fs::File;
use std::io::BufReader;

use tracing::warn;

use crate::error::Result;
use crate::index::IndexEntry;
use crate::record::{self, ReadOutcome, Record};

/// Iterator over the records of one segment
///
/// Each item carries the locator the record was found at, which is what the
/// key directory holds for it if it is still current.
pub struct SegmentIterator {
    reader: BufReader<File>,
    segment: String,
    offset: u64,
    done: bool,
}

impl SegmentIterator {
    pub(super) fn new(file: File, segment: String) -> Self {
        Self {
            reader: BufReader::new(file),
            segment,
            offset: 0,
            done: false,
        }
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<(Record, IndexEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match record::read_from(&mut self.reader) {
            Ok(ReadOutcome::Record(rec)) => {
                let length = rec.encoded_len() as u32;
                let locator = IndexEntry::new(self.segment.clone(), self.offset, length);
                self.offset += length as u64;
                Some(Ok((rec, locator)))
            }
            Ok(ReadOutcome::End) => {
                self.done = true;
                None
            }
            Ok(ReadOutcome::TornTail { bytes }) => {
                warn!(
                    segment = %self.segment,
                    offset = self.offset,
                    torn_bytes = bytes,
                    "Segment ends with a partial record"
                );
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
