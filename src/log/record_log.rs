//! Record Log
//!
//! Whole-file saves, tolerant loads, and the overwrite/append engine behind
//! update and delete.
//!
//! ## Update Rules
//! - New key: append at end-of-file
//! - Existing key, new line fits the old slot: rewrite in place, pad with
//!   filler (no other offset moves)
//! - Existing key, new line is longer: tombstone the old slot, append
//!
//! ## Write Ordering
//! Appends are written before any in-place rewrite or tombstone. A crash
//! part-way through a batch therefore leaves every key with either its old or
//! its new line live, and a rescan of the log picks the newest.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, SyncStrategy};
use crate::error::{IoContext, Result, StoreError};
use crate::index::{BuildReport, Index};
use crate::key::{self, Key};

use super::line::{encode_line, fit_into_slot, parse_key, parse_line, tombstone, ParsedLine};
use super::scanner::{LogScanner, RawLine, SlotReader};
use super::{LogBuilder, PublishedLog, Records, LINE_END};

/// A record already encoded into its on-disk line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Canonical key
    pub key: String,
    /// Full line including the terminator
    pub line: Vec<u8>,
}

impl EncodedRecord {
    /// Encode a key and value; fails with `Encoding` naming the key
    pub fn encode<K: Into<Key>, V: Serialize + ?Sized>(key: K, value: &V) -> Result<Self> {
        let key = key::encode(&key.into());
        let line = encode_line(&key, value)?;
        Ok(Self { key, line })
    }
}

/// What an update did to each key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Rewritten inside their existing slot
    pub in_place: usize,
    /// Old slot tombstoned, new line appended
    pub relocated: usize,
    /// New keys appended
    pub appended: usize,
}

/// What a delete did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Keys tombstoned and removed from the index
    pub deleted: usize,
    /// Keys that were not live (ignored)
    pub missing: usize,
}

/// Planned file mutations for one batch
#[derive(Debug, Default)]
struct Plan {
    /// Lines to append, in order
    appends: Vec<EncodedRecord>,
    /// (offset, bytes) written over existing slots
    overwrites: Vec<(u64, Vec<u8>)>,
    /// Keys to drop from the index once the file is written
    removals: Vec<String>,
}

/// The record file of one store
#[derive(Debug, Clone)]
pub struct RecordLog {
    config: Config,
    index_path: PathBuf,
    staging_index_path: PathBuf,
}

impl RecordLog {
    /// Create a handle for the log named by `config.log_path`
    pub fn new(config: Config) -> Self {
        let index_path = config.index_path();
        let staging_index_path = config.staging_path(&index_path);
        Self {
            config,
            index_path,
            staging_index_path,
        }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.config.log_path
    }

    /// Path of the index file
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Whole-file Operations
    // =========================================================================

    /// Replace the log with `records`, written in ascending key order, and
    /// publish a fresh index alongside it.
    ///
    /// Duplicate keys keep the last record given.
    pub fn save(&self, records: impl IntoIterator<Item = EncodedRecord>) -> Result<PublishedLog> {
        let sorted: BTreeMap<String, Vec<u8>> =
            records.into_iter().map(|r| (r.key, r.line)).collect();

        let mut builder = LogBuilder::new(&self.config)?;
        for (key, line) in &sorted {
            builder.add(key, line)?;
        }
        let published = builder.finish()?;

        info!(
            path = %self.path().display(),
            records = published.records,
            bytes = published.bytes,
            "saved log"
        );
        Ok(published)
    }

    /// Every live record, keys decoded with the configured policy.
    ///
    /// Corrupt lines are skipped with a warning.
    pub fn load(&self) -> Result<Records> {
        let policy = self.config.key_policy;
        Ok(self
            .scan_live()?
            .into_iter()
            .map(|(k, v)| (key::decode(&k, policy), v))
            .collect())
    }

    /// Every live record keyed by its canonical string, last occurrence wins
    pub fn scan_live(&self) -> Result<BTreeMap<String, Value>> {
        let mut records = BTreeMap::new();
        for line in LogScanner::open(self.path(), self.config.buffer_size)? {
            let line = line?;
            match parse_line(&line.bytes) {
                ParsedLine::Record { key, value } => {
                    records.insert(key, value);
                }
                ParsedLine::Blank => {}
                ParsedLine::Corrupt => {
                    warn!(
                        path = %self.path().display(),
                        offset = line.offset,
                        line = %String::from_utf8_lossy(line.bytes.trim_ascii()),
                        "skipping invalid line"
                    );
                }
            }
        }
        Ok(records)
    }

    // =========================================================================
    // Index Maintenance
    // =========================================================================

    /// Rescan the log and persist the resulting index
    pub fn rebuild_index(&self) -> Result<(Index, BuildReport)> {
        let (mut index, report) = Index::build(self.path(), self.config.buffer_size)?;
        self.persist_index(&mut index)?;
        Ok((index, report))
    }

    /// Write `index` to the index file
    pub fn persist_index(&self, index: &mut Index) -> Result<()> {
        index.persist(&self.index_path, &self.staging_index_path)
    }

    /// Open a reader for positioned lookups
    pub fn slot_reader(&self) -> Result<SlotReader> {
        SlotReader::open(self.path(), self.config.buffer_size)
    }

    // =========================================================================
    // Update / Delete
    // =========================================================================

    /// Apply a batch of upserts.
    ///
    /// All file writes happen first; the index is then updated and persisted
    /// once. On error the in-memory `index` is left as it was, but the log may
    /// already hold part of the batch, so the caller must rebuild it.
    pub fn update(
        &self,
        index: &mut Index,
        records: impl IntoIterator<Item = EncodedRecord>,
    ) -> Result<UpdateReport> {
        let records = dedupe(records);
        if records.is_empty() {
            return Ok(UpdateReport::default());
        }

        let mut reader = SlotReader::from_file(self.path(), self.open_rw()?, self.config.buffer_size);
        let (plan, report) = self.with_trusted_index(index, |index| {
            self.plan_update(&mut reader, index, &records)
        })?;

        let placements = self.apply(&reader.into_inner(), &plan)?;
        for (key, offset) in placements {
            index.insert(key, offset);
        }
        self.persist_index(index)?;

        debug!(
            path = %self.path().display(),
            in_place = report.in_place,
            relocated = report.relocated,
            appended = report.appended,
            "applied update"
        );
        Ok(report)
    }

    /// Tombstone every live key in `keys`; unknown keys are ignored
    pub fn delete(&self, index: &mut Index, keys: &[String]) -> Result<DeleteReport> {
        let mut seen = std::collections::HashSet::new();
        let keys: Vec<&String> = keys.iter().filter(|k| seen.insert(k.as_str())).collect();
        if keys.is_empty() {
            return Ok(DeleteReport::default());
        }

        let mut reader = SlotReader::from_file(self.path(), self.open_rw()?, self.config.buffer_size);
        let (plan, report) = self.with_trusted_index(index, |index| {
            self.plan_delete(&mut reader, index, &keys)
        })?;

        if !plan.removals.is_empty() {
            self.apply(&reader.into_inner(), &plan)?;
            for key in &plan.removals {
                index.remove(key);
            }
            self.persist_index(index)?;
        }

        debug!(
            path = %self.path().display(),
            deleted = report.deleted,
            missing = report.missing,
            "applied delete"
        );
        Ok(report)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn open_rw(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.path())
            .at(self.path())
    }

    /// Run `plan` against `index`; if the index disagrees with the log,
    /// rebuild it from the log and plan once more.
    fn with_trusted_index<T, F>(&self, index: &mut Index, mut plan: F) -> Result<T>
    where
        F: FnMut(&Index) -> Result<std::result::Result<T, Mismatch>>,
    {
        match plan(&*index)? {
            Ok(planned) => Ok(planned),
            Err(mismatch) => {
                warn!(
                    path = %self.path().display(),
                    key = mismatch.key.as_str(),
                    offset = mismatch.offset,
                    "index disagrees with log, rebuilding"
                );
                let (rebuilt, _) = self.rebuild_index()?;
                *index = rebuilt;
                plan(&*index)?.map_err(|m| StoreError::IndexMismatch {
                    key: m.key,
                    offset: m.offset,
                })
            }
        }
    }

    fn plan_update(
        &self,
        reader: &mut SlotReader,
        index: &Index,
        records: &[EncodedRecord],
    ) -> Result<std::result::Result<(Plan, UpdateReport), Mismatch>> {
        let mut plan = Plan::default();
        let mut report = UpdateReport::default();

        for record in records {
            let offset = match index.get(&record.key) {
                Some(offset) => offset,
                None => {
                    plan.appends.push(record.clone());
                    report.appended += 1;
                    continue;
                }
            };

            let slot = match read_verified(reader, &record.key, offset)? {
                Some(slot) => slot,
                None => return Ok(Err(Mismatch::new(&record.key, offset))),
            };

            match fit_into_slot(&record.line, &slot.bytes) {
                Some(bytes) => {
                    plan.overwrites.push((offset, bytes));
                    report.in_place += 1;
                }
                None => {
                    plan.overwrites.push((offset, tombstone(&slot.bytes)));
                    plan.appends.push(record.clone());
                    report.relocated += 1;
                }
            }
        }

        Ok(Ok((plan, report)))
    }

    fn plan_delete(
        &self,
        reader: &mut SlotReader,
        index: &Index,
        keys: &[&String],
    ) -> Result<std::result::Result<(Plan, DeleteReport), Mismatch>> {
        let mut plan = Plan::default();
        let mut report = DeleteReport::default();

        for key in keys {
            let offset = match index.get(key) {
                Some(offset) => offset,
                None => {
                    report.missing += 1;
                    continue;
                }
            };

            let slot = match read_verified(reader, key, offset)? {
                Some(slot) => slot,
                None => return Ok(Err(Mismatch::new(key, offset))),
            };

            plan.overwrites.push((offset, tombstone(&slot.bytes)));
            plan.removals.push((*key).clone());
            report.deleted += 1;
        }

        Ok(Ok((plan, report)))
    }

    /// Write a plan to the log: appends first, then overwrites.
    ///
    /// Returns where each appended key landed.
    fn apply(&self, file: &File, plan: &Plan) -> Result<Vec<(String, u64)>> {
        let path = self.path();
        let mut handle = file;
        let mut placements = Vec::with_capacity(plan.appends.len());

        if !plan.appends.is_empty() {
            let mut end = handle.seek(SeekFrom::End(0)).at(path)?;

            // A foreign writer may have left the last line unterminated
            if end > 0 {
                let mut last = [0u8; 1];
                handle.seek(SeekFrom::End(-1)).at(path)?;
                handle.read_exact(&mut last).at(path)?;
                if last[0] != LINE_END {
                    handle.write_all(&[LINE_END]).at(path)?;
                    end += 1;
                }
            }

            let mut writer = BufWriter::with_capacity(self.config.buffer_size, handle);
            for record in &plan.appends {
                writer.write_all(&record.line).at(path)?;
                placements.push((record.key.clone(), end));
                end += record.line.len() as u64;
            }
            writer.flush().at(path)?;
        }

        for (offset, bytes) in &plan.overwrites {
            handle.seek(SeekFrom::Start(*offset)).at(path)?;
            handle.write_all(bytes).at(path)?;
        }

        if self.config.sync_strategy == SyncStrategy::EveryWrite {
            file.sync_data().at(path)?;
        }

        Ok(placements)
    }
}

/// An index entry whose slot does not hold its key
#[derive(Debug)]
struct Mismatch {
    key: String,
    offset: u64,
}

impl Mismatch {
    fn new(key: &str, offset: u64) -> Self {
        Self {
            key: key.to_string(),
            offset,
        }
    }
}

/// Read the slot at `offset` and confirm it holds `key`
fn read_verified(reader: &mut SlotReader, key: &str, offset: u64) -> Result<Option<RawLine>> {
    let slot = reader.read_at(offset)?;
    match parse_key(&slot.bytes) {
        ParsedLine::Record { key: found, .. } if found == key => Ok(Some(slot)),
        _ => Ok(None),
    }
}

/// Collapse duplicate keys: first position, last value
fn dedupe(records: impl IntoIterator<Item = EncodedRecord>) -> Vec<EncodedRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<EncodedRecord> = Vec::new();
    for record in records {
        let existing = positions.get(&record.key).copied();
        match existing {
            Some(i) => out[i] = record,
            None => {
                positions.insert(record.key.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}
