//! Log Scanner
//!
//! Sequential and positioned reads of raw lines.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};

use super::LINE_END;

/// One physical line and where it starts
#[derive(Debug, Clone)]
pub struct RawLine {
    /// Byte offset of the first byte of the line
    pub offset: u64,
    /// Line bytes including the terminator, if present
    pub bytes: Vec<u8>,
}

/// Iterator over every physical line of a log, in file order
pub struct LogScanner {
    path: PathBuf,
    reader: BufReader<File>,
    /// Offset of the next line to be read
    offset: u64,
}

impl LogScanner {
    /// Open a log for a full scan
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::open(path).at(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::with_capacity(buffer_size, file),
            offset: 0,
        })
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.offset
    }
}

impl Iterator for LogScanner {
    type Item = Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = Vec::new();
        match self.reader.read_until(LINE_END, &mut bytes).at(&self.path) {
            Ok(0) => None,
            Ok(n) => {
                let line = RawLine {
                    offset: self.offset,
                    bytes,
                };
                self.offset += n as u64;
                Some(Ok(line))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Random-access line reader used for index lookups
pub struct SlotReader {
    path: PathBuf,
    reader: BufReader<File>,
}

/// Buffer for positioned reads; a single line rarely needs more
const SLOT_BUFFER: usize = 64 * 1024;

impl SlotReader {
    /// Open a log for positioned reads
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::open(path).at(path)?;
        Ok(Self::from_file(path, file, buffer_size))
    }

    pub(crate) fn from_file(path: &Path, file: File, buffer_size: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            reader: BufReader::with_capacity(buffer_size.min(SLOT_BUFFER), file),
        }
    }

    /// Read the line starting at `offset`.
    ///
    /// An offset at or past end-of-file yields an empty line.
    pub fn read_at(&mut self, offset: u64) -> Result<RawLine> {
        self.reader.seek(SeekFrom::Start(offset)).at(&self.path)?;
        let mut bytes = Vec::new();
        self.reader.read_until(LINE_END, &mut bytes).at(&self.path)?;
        Ok(RawLine { offset, bytes })
    }

    pub(crate) fn into_inner(self) -> File {
        self.reader.into_inner()
    }
}
