//! Entity store configuration.

use std::path::{Path, PathBuf};

/// Configuration for opening an entity store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store directory. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the log after every mutation.
    pub sync_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            sync_on_write: true,
        }
    }
}

impl StoreConfig {
    /// Configuration for an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration for a durable store in `path`.
    #[must_use]
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync after every mutation.
    #[must_use]
    pub fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}
