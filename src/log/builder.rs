//! Log Builder
//!
//! Writes a complete log and its index to staging files, then publishes both
//! by renaming them over the live pair.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{IoContext, Result, StoreError};
use crate::index::Index;

/// Outcome of a published whole-file write
#[derive(Debug)]
pub struct PublishedLog {
    /// Index over the new log, already persisted
    pub index: Index,
    /// Records written
    pub records: u64,
    /// Size of the new log in bytes
    pub bytes: u64,
}

/// Builder for a fresh log + index pair
///
/// Lines are written in the order they are added; the caller decides the
/// order (save and compaction both add in ascending key order).
pub struct LogBuilder {
    log_path: PathBuf,
    index_path: PathBuf,
    staging_log: PathBuf,
    staging_index: PathBuf,
    /// Buffered writer on the staging log
    writer: Option<BufWriter<File>>,
    /// Offset the next line will start at
    current_offset: u64,
    /// key → offset of each line written
    entries: BTreeMap<String, u64>,
    record_count: u64,
    /// Set once both renames succeeded
    published: bool,
}

impl LogBuilder {
    /// Create a builder writing to the staging paths derived from `config`
    pub fn new(config: &Config) -> Result<Self> {
        let log_path = config.log_path.clone();
        let index_path = config.index_path();
        let staging_log = config.staging_path(&log_path);
        let staging_index = config.staging_path(&index_path);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging_log)
            .at(&staging_log)?;

        Ok(Self {
            log_path,
            index_path,
            staging_log,
            staging_index,
            writer: Some(BufWriter::with_capacity(config.buffer_size, file)),
            current_offset: 0,
            entries: BTreeMap::new(),
            record_count: 0,
            published: false,
        })
    }

    /// Append one encoded line (terminator included) for `key`
    pub fn add(&mut self, key: &str, line: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            StoreError::Config("log builder used after finish".to_string())
        })?;
        writer.write_all(line).at(&self.staging_log)?;

        self.entries.insert(key.to_string(), self.current_offset);
        self.current_offset += line.len() as u64;
        self.record_count += 1;
        Ok(())
    }

    /// Flush and fsync the staged log, stage the index, and publish both.
    ///
    /// The log is renamed first: if the process dies between the two renames
    /// the old index is older than the new log and gets rebuilt on next use.
    pub fn finish(mut self) -> Result<PublishedLog> {
        let writer = self.writer.take().ok_or_else(|| {
            StoreError::Config("log builder finished twice".to_string())
        })?;
        let file = writer
            .into_inner()
            .map_err(|e| StoreError::storage(&self.staging_log, e.into_error()))?;
        file.sync_all().at(&self.staging_log)?;
        drop(file);

        let mut index = Index::from_entries(std::mem::take(&mut self.entries));
        index.write_to(&self.staging_index)?;

        fs::rename(&self.staging_log, &self.log_path).at(&self.log_path)?;
        fs::rename(&self.staging_index, &self.index_path).at(&self.index_path)?;
        self.published = true;
        sync_parent_dir(&self.log_path)?;

        index.set_stamp(crate::index::FileStamp::of(&self.index_path)?);

        debug!(
            path = %self.log_path.display(),
            records = self.record_count,
            bytes = self.current_offset,
            "published log"
        );

        Ok(PublishedLog {
            index,
            records: self.record_count,
            bytes: self.current_offset,
        })
    }
}

impl Drop for LogBuilder {
    fn drop(&mut self) {
        // Abandoned before publishing: remove whatever was staged
        if !self.published {
            self.writer.take();
            for path in [&self.staging_log, &self.staging_index] {
                if let Err(e) = fs::remove_file(path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove staging file");
                    }
                }
            }
        }
    }
}

/// Make renames inside the directory durable
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir).and_then(|d| d.sync_all()).at(dir)
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}
