//! # tillsync storage
//!
//! Byte-level storage backends underneath the tillsync entity store.
//!
//! A backend is an **append-only byte log**: the entity store frames its own
//! records and hands the bytes over, and on startup reads them back to rebuild
//! its in-memory index. Backends never look inside the bytes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests
//! - [`FileBackend`] - the durable on-device log
//!
//! ## Example
//!
//! ```rust
//! use tillsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"sale:S-1001").unwrap();
//! assert_eq!(backend.read_at(offset, 11).unwrap(), b"sale:S-1001");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
