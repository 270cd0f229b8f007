//! # BlockKV
//!
//! An embedded, log-structured key-value store with:
//! - An append-only value log split into rotating segments
//! - A separate durable key directory (the index log)
//! - In-memory index reconstruction on startup
//! - Background compaction of both logs
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//!              set / delete                      get
//!                   │                             │
//! ┌─────────────────▼─────────────────┐   ┌───────▼───────┐
//! │             Value Log             │   │   Key Dir     │
//! │  (active segment, append + rotate)│   │   (RwLock)    │
//! └─────────────────┬─────────────────┘   └───────┬───────┘
//!                   │ locator                     │ locator
//! ┌─────────────────▼─────────────────┐           │
//! │             Index Log             │           ▼
//! │  (journal of key → locator)       │   Value Log read_at
//! └─────────────────┬─────────────────┘
//!                   ▼
//!               Key Dir update
//!
//! Compactor thread: defragments sealed segments through the write path
//!                   and rewrites the index log down to live keys.
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod index;
pub mod vlog;
pub mod engine;
pub mod compaction;
pub mod cache;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BlockError, Result};
pub use config::{Config, SyncPolicy};
pub use engine::StorageEngine;
pub use index::IndexEntry;
pub use cache::BoundedCache;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of BlockKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
