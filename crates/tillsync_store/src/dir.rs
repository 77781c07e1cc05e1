//! Store directory layout and locking.
//!
//! ```text
//! <store>/
//! ├─ LOCK                     # advisory lock, one consuming process at a time
//! ├─ entities.log             # framed record log
//! └─ entities.log.*.corrupt   # copies of logs found damaged on open
//! ```

use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "entities.log";

/// An opened store directory, holding its lock for as long as it lives.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (and optionally creates) the store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidPath`] if the path is missing (and
    ///   `create_if_missing` is false) or is not a directory
    /// - [`StoreError::Locked`] if another process holds the lock
    /// - I/O errors
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::InvalidPath(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::InvalidPath(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the record log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        Self::log_path_in(&self.path)
    }

    /// Returns where the record log lives inside `dir`, without locking.
    #[must_use]
    pub fn log_path_in(dir: &Path) -> PathBuf {
        dir.join(LOG_FILE)
    }

    /// Copies the current log aside before a damaged log is rewritten.
    ///
    /// Returns the path of the copy.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the copy cannot be written.
    pub fn preserve_log(&self) -> StoreResult<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let copy = self.path.join(format!("{LOG_FILE}.{stamp}.corrupt"));
        fs::copy(self.log_path(), &copy)?;
        Ok(copy)
    }
}
