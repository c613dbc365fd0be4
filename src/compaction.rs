//! Compaction
//!
//! Rewrites a log with only its live records, in ascending key order, and
//! rebuilds the index over the new offsets.
//!
//! Tombstones, padding, superseded duplicates and unparseable lines are
//! dropped. Canonical key strings are copied verbatim, so compaction never
//! reinterprets keys. The new pair is staged and renamed into place; a failure
//! before the rename leaves the live log and index untouched.

use std::fs;

use serde::Serialize;
use tracing::info;

use crate::error::{IoContext, Result};
use crate::index::Index;
use crate::log::{encode_line, EncodedRecord, RecordLog};

/// Outcome of one compaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    /// Live records kept
    pub records: u64,
    /// Log size before compaction
    pub bytes_before: u64,
    /// Log size after compaction
    pub bytes_after: u64,
}

impl CompactionStats {
    /// Bytes given back by dropping tombstones, padding and dead lines
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Compacts one record log
pub struct Compactor<'a> {
    log: &'a RecordLog,
}

impl<'a> Compactor<'a> {
    pub fn new(log: &'a RecordLog) -> Self {
        Self { log }
    }

    /// Rewrite the log and return the index over the published file
    pub fn compact(&self) -> Result<(Index, CompactionStats)> {
        let path = self.log.path();
        let bytes_before = fs::metadata(path).at(path)?.len();

        let live = self.log.scan_live()?;
        let mut records = Vec::with_capacity(live.len());
        for (key, value) in &live {
            records.push(EncodedRecord {
                key: key.clone(),
                line: encode_line(key, value)?,
            });
        }

        let published = self.log.save(records)?;
        let stats = CompactionStats {
            records: published.records,
            bytes_before,
            bytes_after: published.bytes,
        };

        info!(
            path = %path.display(),
            records = stats.records,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            reclaimed = stats.reclaimed(),
            "compacted log"
        );

        Ok((published.index, stats))
    }
}
