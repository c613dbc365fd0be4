//! Index Builder
//!
//! Rebuilds an index from scratch by scanning the log.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;
use crate::log::{parse_key, LogScanner, ParsedLine};

use super::Index;

/// Result of a full index rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Physical lines read
    pub lines_scanned: u64,

    /// Parseable single-key lines (superseded duplicates included)
    pub records_indexed: u64,

    /// Empty or tombstoned lines
    pub blank_lines: u64,

    /// Lines skipped because they failed to parse
    pub corrupt_lines: u64,

    /// Bytes scanned
    pub bytes_scanned: u64,
}

impl Index {
    /// Build an index by scanning `log_path` from start to end.
    ///
    /// Corrupt lines are skipped. When a key appears more than once the last
    /// occurrence wins.
    pub fn build(log_path: &Path, buffer_size: usize) -> Result<(Index, BuildReport)> {
        let mut entries = BTreeMap::new();
        let mut report = BuildReport::default();

        let mut scanner = LogScanner::open(log_path, buffer_size)?;
        for line in scanner.by_ref() {
            let line = line?;
            report.lines_scanned += 1;

            match parse_key(&line.bytes) {
                ParsedLine::Record { key, .. } => {
                    report.records_indexed += 1;
                    entries.insert(key, line.offset);
                }
                ParsedLine::Blank => report.blank_lines += 1,
                ParsedLine::Corrupt => {
                    report.corrupt_lines += 1;
                    debug!(
                        path = %log_path.display(),
                        offset = line.offset,
                        "skipping corrupt line while indexing"
                    );
                }
            }
        }
        report.bytes_scanned = scanner.position();

        info!(
            path = %log_path.display(),
            keys = entries.len(),
            lines = report.lines_scanned,
            corrupt = report.corrupt_lines,
            "built index from log"
        );

        Ok((Index::from_entries(entries), report))
    }
}
