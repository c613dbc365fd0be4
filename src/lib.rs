//! # jsonlkv
//!
//! A single-file, key-indexed record store with:
//! - One JSON object per line, exactly one key per object
//! - A sidecar index mapping each key to the byte offset of its line
//! - In-place rewrites for updates that fit, append + tombstone otherwise
//! - Inclusive range selection through the sorted index
//! - Compaction that re-sorts the log and drops dead bytes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │            (Single Writer / Multi Reader, flock)             │
//! └───────┬──────────────────┬──────────────────┬───────────────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//!  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//!  │  RecordLog  │    │ RangeQuery  │    │  Compactor  │
//!  │ (overwrite/ │    │  (seek per  │    │  (staged    │
//!  │   append)   │    │    key)     │    │   rewrite)  │
//!  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//!  ┌─────────────────────────────────────────────────────────────┐
//!  │        data.jsonl  ◄────── offsets ──────  data.jsonl.idx    │
//!  └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use jsonlkv::Engine;
//! use serde_json::json;
//!
//! # fn main() -> jsonlkv::Result<()> {
//! let engine = Engine::open_path(std::path::Path::new("prices.jsonl"))?;
//! engine.update([("a", json!({"v": 1})), ("b", json!({"v": 2}))])?;
//! let hits = engine.select(Some("a"), Some("b"))?;
//! assert_eq!(hits.len(), 2);
//! engine.compact()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod index;
pub mod log;
pub mod query;
pub mod compaction;
pub mod lock;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{Config, SyncStrategy};
pub use compaction::CompactionStats;
pub use engine::{Engine, StoreStats};
pub use key::{Key, KeyPolicy};
pub use log::{DeleteReport, Records, UpdateReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of jsonlkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
