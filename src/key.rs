//! Key Codec
//!
//! Converts logical keys to and from their canonical on-disk string form.
//!
//! ## Canonical Form
//! - Text keys are stored verbatim
//! - Timestamp keys are stored as `YYYY-MM-DDTHH:MM:SS` (19 bytes, second
//!   precision), which sorts byte-wise in chronological order
//!
//! Ordering, equality and hashing of [`Key`] are all defined on the canonical
//! string, so the in-memory order always agrees with the index file order.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Serialize, Serializer};

/// strftime pattern of an encoded timestamp key
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Byte length of an encoded timestamp key
pub const TIMESTAMP_LEN: usize = 19;

/// Byte position of the date/time separator in an encoded timestamp key
const SEPARATOR_POS: usize = 10;

/// A logical record key
#[derive(Debug, Clone)]
pub enum Key {
    /// Arbitrary text, stored verbatim
    Text(String),

    /// A chronological key with second precision
    Timestamp(NaiveDateTime),
}

/// How canonical strings are turned back into keys on read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// Decode timestamp-shaped strings (19 bytes, `T` at byte 10) as timestamps.
    ///
    /// Only strings that format back to exactly themselves are reinterpreted;
    /// anything else stays text. A text key that happens to be a canonical
    /// timestamp comes back as a `Timestamp` with the same canonical form, so
    /// lookups still match.
    #[default]
    Sniff,

    /// Every key is text
    Text,

    /// Every key is a timestamp; keys that are not canonical timestamps stay text
    Timestamp,
}

impl Key {
    /// Canonical on-disk form of this key
    pub fn canonical(&self) -> Cow<'_, str> {
        match self {
            Key::Text(s) => Cow::Borrowed(s.as_str()),
            Key::Timestamp(ts) => Cow::Owned(ts.format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    /// Returns the timestamp if this is a chronological key
    pub fn as_timestamp(&self) -> Option<&NaiveDateTime> {
        match self {
            Key::Timestamp(ts) => Some(ts),
            Key::Text(_) => None,
        }
    }

    /// Returns the text if this is a text key
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Key::Text(s) => Some(s),
            Key::Timestamp(_) => None,
        }
    }
}

/// Encode a key into its canonical string
pub fn encode(key: &Key) -> String {
    key.canonical().into_owned()
}

/// Decode a canonical string under the given policy
pub fn decode(s: &str, policy: KeyPolicy) -> Key {
    match policy {
        KeyPolicy::Text => Key::Text(s.to_string()),
        KeyPolicy::Sniff => {
            if looks_like_timestamp(s) {
                if let Some(ts) = parse_exact(s) {
                    return Key::Timestamp(ts);
                }
            }
            Key::Text(s.to_string())
        }
        KeyPolicy::Timestamp => match parse_exact(s) {
            Some(ts) => Key::Timestamp(ts),
            None => {
                tracing::warn!(key = s, "key is not a canonical timestamp, keeping as text");
                Key::Text(s.to_string())
            }
        },
    }
}

/// Length and separator test; a cheap filter before [`parse_exact`]
fn looks_like_timestamp(s: &str) -> bool {
    s.len() == TIMESTAMP_LEN && s.as_bytes()[SEPARATOR_POS] == b'T'
}

/// Parse `s` as a timestamp only if formatting it back yields `s` again.
///
/// chrono accepts padding inside numeric fields ("2024-01-01T 0:00:00"),
/// which would change the canonical string of the key.
fn parse_exact(s: &str) -> Option<NaiveDateTime> {
    let ts = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()?;
    (ts.format(TIMESTAMP_FORMAT).to_string() == s).then_some(ts)
}

// =============================================================================
// Conversions
// =============================================================================

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::Text(s.clone())
    }
}

impl From<&Key> for Key {
    fn from(k: &Key) -> Self {
        k.clone()
    }
}

impl From<NaiveDateTime> for Key {
    fn from(ts: NaiveDateTime) -> Self {
        // Sub-second precision is not representable on disk
        Key::Timestamp(ts.with_nanosecond(0).unwrap_or(ts))
    }
}

impl From<DateTime<Utc>> for Key {
    fn from(ts: DateTime<Utc>) -> Self {
        Key::from(ts.naive_utc())
    }
}

macro_rules! key_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Key {
                fn from(n: $t) -> Self {
                    Key::Text(n.to_string())
                }
            }
        )*
    };
}

key_from_integer!(i32, i64, u32, u64, usize);

// =============================================================================
// Canonical Ordering
// =============================================================================

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Text(a), Key::Text(b)) => a == b,
            _ => self.canonical() == other.canonical(),
        }
    }
}

impl Eq for Key {}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Text(a), Key::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.canonical().as_bytes().cmp(other.canonical().as_bytes()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}
