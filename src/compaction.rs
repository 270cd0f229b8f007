//! Compaction Module
//!
//! Background space reclamation.
//!
//! ## Responsibilities
//! - Defragment sealed segments: copy still-current records into the active
//!   segment, then delete the old file
//! - Periodically compact the index log (see [`IndexLog::compact`])
//!
//! Failures here are logged and retried on the next tick; they never reach
//! foreground callers.
//!
//! [`IndexLog::compact`]: crate::index::IndexLog::compact

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use tracing::{debug, info, warn};

use crate::engine::EngineCore;
use crate::error::Result;

/// Outcome of one defragmentation sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DefragStats {
    /// Sealed segments old enough to be swept
    pub segments_scanned: usize,

    /// Segments fully rewritten and deleted
    pub segments_removed: usize,

    /// Still-current records copied into the active segment
    pub records_moved: u64,

    /// Records left behind (overwritten, deleted, or moved meanwhile)
    pub records_dropped: u64,

    /// Bytes freed by deleting segments
    pub bytes_reclaimed: u64,

    /// Flushes of both logs issued ahead of a segment removal
    pub flushes: usize,
}

/// Background compaction worker
///
/// One thread waits on two independent tickers (index compaction and
/// defragmentation) plus a shutdown channel.
pub struct Compactor {
    /// Dropping the sender wakes the worker up for shutdown
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    /// Spawn the worker; returns None when both intervals are zero
    pub(crate) fn start(core: Arc<EngineCore>) -> Result<Option<Self>> {
        let index_interval = core.config.index_compact_interval;
        let defrag_interval = core.config.defrag_interval;
        if index_interval.is_zero() && defrag_interval.is_zero() {
            return Ok(None);
        }

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("blockkv-compactor".to_string())
            .spawn(move || run(core, shutdown_rx, index_interval, defrag_interval))?;

        debug!(?index_interval, ?defrag_interval, "Compactor started");
        Ok(Some(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }))
    }

    /// Stop the worker and wait for the pass in flight to finish
    pub fn shutdown(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Compactor thread panicked");
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn ticker(interval: Duration) -> Receiver<Instant> {
    if interval.is_zero() {
        channel::never()
    } else {
        channel::tick(interval)
    }
}

fn run(
    core: Arc<EngineCore>,
    shutdown: Receiver<()>,
    index_interval: Duration,
    defrag_interval: Duration,
) {
    let index_tick = ticker(index_interval);
    let defrag_tick = ticker(defrag_interval);

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(index_tick) -> _ => {
                if let Err(e) = core.compact_index() {
                    warn!(error = %e, "Index log compaction failed; retrying next tick");
                }
            }
            recv(defrag_tick) -> _ => {
                if let Err(e) = defragment(&core) {
                    warn!(error = %e, "Defragmentation sweep failed; retrying next tick");
                }
            }
        }
    }

    debug!("Compactor stopped");
}

// =============================================================================
// Defragmentation
// =============================================================================

/// Sweep every sealed segment older than the retention window
///
/// A segment that fails part-way is left on disk untouched; its records are
/// still reachable through their original locators.
pub(crate) fn defragment(core: &EngineCore) -> Result<DefragStats> {
    let _guard = core.compaction_lock.lock();

    // List before reading the active name: anything created after the
    // listing (including a rotation during the sweep) is never a candidate.
    let segments = core.vlog.segments()?;
    let active = core.vlog.active_segment();
    let retention = core.config.defrag_retention;

    let mut stats = DefragStats::default();
    for segment in segments {
        if segment.name == active || !segment.older_than(retention) {
            continue;
        }
        stats.segments_scanned += 1;

        match defragment_segment(core, &segment.name, &mut stats) {
            Ok(freed) => {
                stats.segments_removed += 1;
                stats.bytes_reclaimed += freed;
            }
            Err(e) => {
                warn!(segment = %segment.name, error = %e, "Segment defragmentation deferred");
            }
        }
    }

    if stats.segments_scanned > 0 {
        info!(
            scanned = stats.segments_scanned,
            removed = stats.segments_removed,
            moved = stats.records_moved,
            dropped = stats.records_dropped,
            bytes = stats.bytes_reclaimed,
            "Defragmentation sweep finished"
        );
    }
    Ok(stats)
}

/// Move the still-current records out of one segment, then delete it.
/// Returns the bytes freed.
fn defragment_segment(core: &EngineCore, segment: &str, stats: &mut DefragStats) -> Result<u64> {
    for item in core.vlog.scan(segment)? {
        let (record, locator) = item?;

        let current = core
            .locate(&record.key)
            .map_or(false, |entry| entry.is_same(&locator));

        if current && core.relocate(&record.key, &record.value, &locator)? {
            stats.records_moved += 1;
        } else {
            stats.records_dropped += 1;
        }
    }

    // Moved records and the index entries pointing at them must reach disk
    // before the only other copy is unlinked
    core.sync()?;
    stats.flushes += 1;

    core.vlog.remove_segment(segment)
}
