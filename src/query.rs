//! Range Query
//!
//! Point and inclusive range lookups driven by the sorted index.
//!
//! Selection walks the B-tree range (O(log n + k)) and then seeks once per
//! selected key; the log is never scanned sequentially when a bound is given.
//! A selected line that fails to parse, or that no longer holds its key, is
//! left out of the result.

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::index::Index;
use crate::key::{self, KeyPolicy};
use crate::log::{parse_line, ParsedLine, Records, RecordLog, SlotReader};

/// Index-driven reads over one log
pub struct RangeQuery<'a> {
    log: &'a RecordLog,
    index: &'a Index,
    policy: KeyPolicy,
}

impl<'a> RangeQuery<'a> {
    /// Create a query over `log` using an index known to be fresh
    pub fn new(log: &'a RecordLog, index: &'a Index) -> Self {
        Self {
            log,
            index,
            policy: log.config().key_policy,
        }
    }

    /// Value of one canonical key, if live
    pub fn point(&self, key: &str) -> Result<Option<Value>> {
        let offset = match self.index.get(key) {
            Some(offset) => offset,
            None => return Ok(None),
        };
        let mut reader = self.log.slot_reader()?;
        read_value(&mut reader, key, offset)
    }

    /// Records with `lower <= key <= upper` (canonical comparison).
    ///
    /// Missing bounds default to the smallest/largest indexed key.
    pub fn range(&self, lower: Option<&str>, upper: Option<&str>) -> Result<Records> {
        let mut records = Records::new();
        let mut selected = self.index.range(lower, upper).peekable();
        if selected.peek().is_none() {
            return Ok(records);
        }

        let mut reader = self.log.slot_reader()?;
        for (key, offset) in selected {
            if let Some(value) = read_value(&mut reader, key, offset)? {
                records.insert(key::decode(key, self.policy), value);
            }
        }
        Ok(records)
    }

    /// Records between two optional bounds; a single-key lookup when they
    /// are equal
    pub fn select(&self, lower: Option<&str>, upper: Option<&str>) -> Result<Records> {
        match (lower, upper) {
            (Some(lo), Some(hi)) if lo == hi => {
                let mut records = Records::new();
                if let Some(value) = self.point(lo)? {
                    records.insert(key::decode(lo, self.policy), value);
                }
                Ok(records)
            }
            _ => self.range(lower, upper),
        }
    }
}

/// Decode the line at `offset`, tolerating lines that no longer hold `key`
fn read_value(reader: &mut SlotReader, key: &str, offset: u64) -> Result<Option<Value>> {
    let slot = reader.read_at(offset)?;
    match parse_line(&slot.bytes) {
        ParsedLine::Record { key: found, value } if found == key => Ok(Some(value)),
        _ => {
            debug!(key, offset, "indexed line did not decode to its key, skipping");
            Ok(None)
        }
    }
}
