//! Record Log Module
//!
//! The primary record file: one JSON object with exactly one key per line.
//!
//! ## Responsibilities
//! - Encode and classify lines
//! - Whole-file writes with incrementally computed offsets
//! - In-place rewrites, relocations and tombstones for existing keys
//! - Tolerant sequential reads (corrupt lines are skipped, never fatal)
//!
//! ## File Format
//! ```text
//! offset 0   {"a":{"v":1}}\n            live record
//! offset 14  {"b":{"v":2}}   \n         rewritten in place, padded
//! offset 31               \n            tombstone: N-1 spaces + '\n'
//! offset 46  {"c":{"v":3,"x":"y"}}\n    relocated record, appended
//! ```
//! A slot never changes length; a record that outgrows its slot is
//! tombstoned and appended at end-of-file.

mod builder;
mod line;
mod record_log;
mod scanner;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::key::Key;

pub use builder::{LogBuilder, PublishedLog};
pub use line::{encode_line, fit_into_slot, parse_key, parse_line, tombstone, ParsedLine};
pub use record_log::{DeleteReport, EncodedRecord, RecordLog, UpdateReport};
pub use scanner::{LogScanner, RawLine, SlotReader};

// =============================================================================
// Format Constants
// =============================================================================

/// Byte used to pad rewritten slots and to fill tombstones
pub const FILLER: u8 = b' ';

/// Line terminator
pub const LINE_END: u8 = b'\n';

/// Logical view of a store: key → value, in canonical key order
pub type Records = BTreeMap<Key, Value>;
