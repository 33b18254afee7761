//! Single-writer discipline across process invocations

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fd_lock::RwLockWriteGuard;

use crate::error::{Error, Result};

/// How long to wait for a competing run before giving up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    /// Total time to keep retrying
    pub wait: Duration,
    /// Pause between retries
    pub poll: Duration,
}

impl LockPolicy {
    /// Try exactly once
    pub fn no_wait() -> Self {
        Self {
            wait: Duration::ZERO,
            poll: Duration::ZERO,
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(5),
            poll: Duration::from_millis(100),
        }
    }
}

/// Exclusive advisory lock on a file
pub struct RunLock {
    path: PathBuf,
    inner: fd_lock::RwLock<File>,
}

impl RunLock {
    /// Open (creating if needed) the lock file
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = Self::open_file(&path).map_err(|source| Error::Lock {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            inner: fd_lock::RwLock::new(file),
        })
    }

    fn open_file(path: &Path) -> io::Result<File> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock if nobody else holds it
    ///
    /// Returns `Ok(None)` when another process holds the lock. The lock is
    /// released when the guard drops.
    pub fn try_acquire(&mut self) -> Result<Option<RwLockWriteGuard<'_, File>>> {
        match self.inner.try_write() {
            Ok(guard) => Ok(Some(guard)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(Error::Lock {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json.lock");

        let mut first = RunLock::open(&path).unwrap();
        let mut second = RunLock::open(&path).unwrap();

        let guard = first.try_acquire().unwrap();
        assert!(guard.is_some());
        assert!(second.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(second.try_acquire().unwrap().is_some());
    }
}
