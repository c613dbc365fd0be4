//! Line Codec
//!
//! Encodes one record as one line and classifies raw lines read back.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StoreError};

use super::{FILLER, LINE_END};

/// A raw line classified by content
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine<V> {
    /// Empty, whitespace-only, or a tombstone
    Blank,

    /// A single-key object
    Record { key: String, value: V },

    /// Anything else: partial writes, multi-key objects, non-JSON
    Corrupt,
}

/// Encode `{"<key>":<value>}\n`
pub fn encode_line<V: Serialize + ?Sized>(key: &str, value: &V) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(key.len() + 64);
    line.push(b'{');
    serde_json::to_writer(&mut line, key).map_err(|source| StoreError::Encoding {
        key: key.to_string(),
        source,
    })?;
    line.push(b':');
    serde_json::to_writer(&mut line, value).map_err(|source| StoreError::Encoding {
        key: key.to_string(),
        source,
    })?;
    line.push(b'}');
    line.push(LINE_END);
    Ok(line)
}

/// Parse a raw line, including its value
pub fn parse_line(raw: &[u8]) -> ParsedLine<Value> {
    parse_as::<Value>(raw)
}

/// Parse only the key of a raw line; the value is validated but not kept
pub fn parse_key(raw: &[u8]) -> ParsedLine<()> {
    match parse_as::<IgnoredAny>(raw) {
        ParsedLine::Record { key, .. } => ParsedLine::Record { key, value: () },
        ParsedLine::Blank => ParsedLine::Blank,
        ParsedLine::Corrupt => ParsedLine::Corrupt,
    }
}

fn parse_as<V: DeserializeOwned>(raw: &[u8]) -> ParsedLine<V> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return ParsedLine::Blank;
    }
    match serde_json::from_slice::<BTreeMap<String, V>>(trimmed) {
        Ok(map) if map.len() == 1 => match map.into_iter().next() {
            Some((key, value)) => ParsedLine::Record { key, value },
            None => ParsedLine::Corrupt,
        },
        _ => ParsedLine::Corrupt,
    }
}

/// Filler of the same length as `slot`, keeping its terminator if it had one
pub fn tombstone(slot: &[u8]) -> Vec<u8> {
    fill_slot(&[], slot)
}

/// `line` rewritten to occupy exactly `slot`, padded with filler before the
/// terminator.
///
/// Returns `None` if the line's content does not fit.
pub fn fit_into_slot(line: &[u8], slot: &[u8]) -> Option<Vec<u8>> {
    let content = strip_terminator(line);
    if content.len() > slot_capacity(slot) {
        return None;
    }
    Some(fill_slot(content, slot))
}

fn fill_slot(content: &[u8], slot: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(slot.len());
    out.extend_from_slice(content);
    out.resize(slot_capacity(slot), FILLER);
    if is_terminated(slot) {
        out.push(LINE_END);
    }
    out
}

/// Bytes available for content in a slot (its length minus the terminator)
fn slot_capacity(slot: &[u8]) -> usize {
    strip_terminator(slot).len()
}

fn is_terminated(raw: &[u8]) -> bool {
    raw.last() == Some(&LINE_END)
}

fn strip_terminator(raw: &[u8]) -> &[u8] {
    raw.strip_suffix(&[LINE_END]).unwrap_or(raw)
}
