//! Index Module
//!
//! Sorted `canonical key → byte offset` map over one log file.
//!
//! ## Responsibilities
//! - Build by a full scan of the log (corrupt lines skipped)
//! - Inclusive range selection in O(log n + k)
//! - Persist to / load from the sidecar index file
//! - Decide when the sidecar is stale and must be rebuilt
//!
//! The index is a cache: it can always be regenerated from the log alone.
//!
//! ## File Format
//! ```text
//! {
//!   "a": 0,
//!   "b": 13,
//!   "c": 26
//! }
//! ```
//! A JSON object sorted by key, pretty-printed with a 2-space indent.

mod builder;
mod file;

use std::collections::BTreeMap;
use std::ops::Bound;

pub use builder::BuildReport;
pub use file::{check_freshness, ensure_fresh, FileStamp, Freshness};

/// In-memory index for one log file
#[derive(Debug, Clone, Default)]
pub struct Index {
    /// canonical key → offset of the line start
    entries: BTreeMap<String, u64>,

    /// Stamp of the index file this copy was loaded from or persisted to
    stamp: Option<FileStamp>,
}

impl Index {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of a key's current line
    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Check whether a key is live
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or move a key, returning its previous offset
    pub fn insert(&mut self, key: String, offset: u64) -> Option<u64> {
        self.entries.insert(key, offset)
    }

    /// Remove a key, returning its offset
    pub fn remove(&mut self, key: &str) -> Option<u64> {
        self.entries.remove(key)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest live key
    pub fn min_key(&self) -> Option<&str> {
        self.entries.keys().next().map(|k| k.as_str())
    }

    /// Largest live key
    pub fn max_key(&self) -> Option<&str> {
        self.entries.keys().next_back().map(|k| k.as_str())
    }

    /// Keys `k` with `lower <= k <= upper`, in ascending order.
    ///
    /// A missing bound is open on that side. `lower > upper` selects nothing.
    pub fn range<'a>(
        &'a self,
        lower: Option<&'a str>,
        upper: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a str, u64)> + 'a {
        let bounds = match (lower, upper) {
            // BTreeMap::range panics on inverted bounds
            (Some(lo), Some(hi)) if lo > hi => None,
            _ => Some((
                lower.map_or(Bound::Unbounded, Bound::Included),
                upper.map_or(Bound::Unbounded, Bound::Included),
            )),
        };
        bounds
            .into_iter()
            .flat_map(move |b| self.entries.range::<str, _>(b))
            .map(|(k, &off)| (k.as_str(), off))
    }

    /// All entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, &off)| (k.as_str(), off))
    }

    /// Stamp of the backing index file, if any
    pub fn stamp(&self) -> Option<&FileStamp> {
        self.stamp.as_ref()
    }

    pub(crate) fn set_stamp(&mut self, stamp: Option<FileStamp>) {
        self.stamp = stamp;
    }

    pub(crate) fn from_entries(entries: BTreeMap<String, u64>) -> Self {
        Self {
            entries,
            stamp: None,
        }
    }
}
