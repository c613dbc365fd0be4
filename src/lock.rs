//! Writer Lock
//!
//! Exclusive advisory lock on `<log>.lock`, held for the lifetime of an
//! engine so only one process mutates a store at a time.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::{Result, StoreError};

/// A held lock; released when dropped
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock `path`, creating it if needed.
    ///
    /// Fails immediately with `Locked` if another handle holds the lock. The
    /// lock file contains the holder's process ID for debugging.
    pub fn lock(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::storage(path, e))?;

        if let Err(e) = Self::try_lock(&file) {
            if e.kind() == io::ErrorKind::WouldBlock {
                return Err(StoreError::Locked {
                    path: path.to_path_buf(),
                });
            }
            return Err(StoreError::storage(path, e));
        }

        // Only the holder rewrites the contents
        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .and_then(|_| file.flush())
            .map_err(|e| StoreError::storage(path, e))?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file`
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; in-process locking still applies
        Ok(())
    }

    /// Get the path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
