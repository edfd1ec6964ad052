//! Advisory file locks scoping access to the companion cache files.
//!
//! Readers take shared locks, the writer takes exclusive locks, and both
//! paths lock the object file before the info file so a concurrent
//! reader and writer can never deadlock. The guard owns the locked
//! handle; all reads and writes go through it, and the lock is released
//! when the guard drops.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// RAII guard for an advisory lock on one cache file.
///
/// Dropping the guard releases the lock. Lock acquisition blocks until
/// granted; acquisition failure (including a missing file on the read
/// path) is surfaced as an error the caller treats as cache-unavailable.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Opens `path` read-only and acquires a shared lock.
    ///
    /// Multiple shared locks may be held simultaneously across processes.
    pub fn shared(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        file.lock_shared()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Opens `path` for read/write (creating it if absent) and acquires
    /// an exclusive lock, blocking until no other lock-holder remains.
    pub fn exclusive(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.lock()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// The locked file handle.
    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
