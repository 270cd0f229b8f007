//! Bounded Cache
//!
//! LRU-bounded view over a [`StorageEngine`]: at most `capacity` keys are kept.
//! The cache stores each key's serialized locator, not its value; values are
//! always read from the value log. When admitting a key would exceed the
//! capacity, the least recently used key is evicted and deleted from the
//! engine.
//!
//! Writes to cached keys must go through the cache. A locator that went
//! stale because defragmentation moved the record is refreshed from the
//! engine on the next read.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::engine::StorageEngine;
use crate::error::{BlockError, Result};
use crate::index::IndexEntry;

/// LRU wrapper keyed by the engine's keys
pub struct BoundedCache {
    engine: Arc<StorageEngine>,
    capacity: usize,
    state: Mutex<LruState>,
}

struct Slot {
    /// Encoded `IndexEntry`
    locator: Vec<u8>,
    stamp: u64,
}

#[derive(Default)]
struct LruState {
    slots: HashMap<Vec<u8>, Slot>,

    /// stamp → key; the first entry is the least recently used
    recency: BTreeMap<u64, Vec<u8>>,

    clock: u64,
}

impl LruState {
    /// Insert or refresh a key; returns the key evicted to make room, if any
    fn admit(&mut self, key: &[u8], locator: Vec<u8>, capacity: usize) -> Option<Vec<u8>> {
        self.clock += 1;
        let stamp = self.clock;

        if let Some(slot) = self.slots.get_mut(key) {
            self.recency.remove(&slot.stamp);
            slot.stamp = stamp;
            slot.locator = locator;
            self.recency.insert(stamp, key.to_vec());
            return None;
        }

        self.slots.insert(key.to_vec(), Slot { locator, stamp });
        self.recency.insert(stamp, key.to_vec());

        if self.slots.len() > capacity {
            let (_, evicted) = self.recency.pop_first()?;
            self.slots.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    /// Mark a key as just used; returns its locator
    fn touch(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.clock += 1;
        let stamp = self.clock;
        let slot = self.slots.get_mut(key)?;
        self.recency.remove(&slot.stamp);
        slot.stamp = stamp;
        self.recency.insert(stamp, key.to_vec());
        Some(slot.locator.clone())
    }

    fn forget(&mut self, key: &[u8]) {
        if let Some(slot) = self.slots.remove(key) {
            self.recency.remove(&slot.stamp);
        }
    }
}

impl BoundedCache {
    pub fn new(engine: Arc<StorageEngine>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BlockError::Config("cache capacity must be at least 1".to_string()));
        }
        Ok(Self {
            engine,
            capacity,
            state: Mutex::new(LruState::default()),
        })
    }

    /// Get a value, marking the key as most recently used
    ///
    /// Keys the cache does not track yet are looked up in the engine and
    /// admitted.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Bytes> {
        let key = key.as_ref();

        let cached = self.state.lock().touch(key);
        if let Some(locator) = cached {
            let entry = IndexEntry::decode(&locator)?;
            match self.engine.read_located(&entry) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_missing_file() || matches!(e, BlockError::CorruptIndex { .. }) => {
                    debug!(segment = %entry.segment, "Cached locator is stale, refreshing");
                }
                Err(e) => return Err(e),
            }
        }

        let Some(entry) = self.engine.locate(key) else {
            self.state.lock().forget(key);
            return Err(BlockError::KeyNotFound);
        };
        let value = self.engine.read_located(&entry)?;
        self.admit(key)?;
        Ok(value)
    }

    /// Put a key-value pair, evicting the least recently used key if full
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.engine.set(key, value)?;
        self.admit(key)
    }

    /// Delete a key from the engine and the cache
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.engine.delete(key)?;
        self.state.lock().forget(key);
        Ok(())
    }

    /// Track `key` at the locator the engine holds for it right now
    ///
    /// Resolved under the state lock: an older locator never replaces a
    /// newer one admitted by a concurrent write.
    fn admit(&self, key: &[u8]) -> Result<()> {
        let evicted = {
            let mut state = self.state.lock();
            match self.engine.locate(key) {
                Some(current) => state.admit(key, current.encode(), self.capacity),
                None => {
                    state.forget(key);
                    None
                }
            }
        };
        if let Some(evicted) = evicted {
            debug!(key = ?String::from_utf8_lossy(&evicted), "Evicting least recently used key");
            self.engine.delete(&evicted)?;
        }
        Ok(())
    }

    /// True when the cache currently tracks `key`
    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        self.state.lock().slots.contains_key(key.as_ref())
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }
}
