//! Open-file registry for encrypted vault filesystems.
//!
//! Mount backends hand out one file handle per `open` call, but the
//! decrypted state behind a file (header, key material, cached blocks,
//! directory listing) must exist only once per file no matter how many
//! handles point at it. This crate keeps that state in a reference-counted
//! table keyed by the file's vault identifier.
//!
//! # Components
//!
//! - [`FileTable`] - The registry: open, close, idle cache, teardown
//! - [`FileHandle`] - Move-only scoped reference that closes itself on drop
//! - [`RawFile`] - A reference detached from its handle, for FFI-style storage
//! - [`FileLockGuard`] / [`DualFileLockGuard`] - Per-object locking, with a
//!   deadlock-free order for operations touching two objects
//! - [`FileBackend`] - Trait the storage layer implements to build and flush
//!   objects
//! - [`TableConfig`] - Master key, format parameters and eviction policy
//! - [`FileTableStats`] - Activity counters
//!
//! # Idle cache
//!
//! Closing the last reference does not flush the object. It stays resident
//! in an idle queue so a quick reopen (common for `stat` followed by `open`)
//! is free. Once more than [`DEFAULT_MAX_IDLE`] objects are idle, the oldest
//! [`DEFAULT_EVICT_BATCH`] are flushed and dropped. Both numbers are
//! configurable through [`EvictionPolicy`].
//!
//! # Example
//!
//! ```
//! use oxcrypt_filetable::testing::{test_id, MemoryBackend};
//! use oxcrypt_filetable::{DualFileLockGuard, FileKind, FileTable, TableConfig, TableKey};
//!
//! let table = FileTable::new(MemoryBackend::new(), TableConfig::new(TableKey::new([7; 32])))?;
//!
//! let dir = table.create_as(&test_id(1), FileKind::Directory)?;
//! let file = table.create_as(&test_id(2), FileKind::RegularFile)?;
//!
//! {
//!     let mut both = DualFileLockGuard::new(&dir, &file);
//!     if let Some((dir_obj, file_obj)) = both.pair_mut() {
//!         file_obj.as_regular_mut().unwrap().write_at(0, b"hello");
//!         dir_obj
//!             .as_directory_mut()
//!             .unwrap()
//!             .insert("hello.txt".to_string(), test_id(2), FileKind::RegularFile);
//!     }
//! }
//!
//! drop(file);
//! assert!(table.is_idle(&test_id(2)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod guard;
pub mod handle;
pub mod id;
pub mod node;
pub mod stats;
pub mod table;
pub mod testing;

pub use backend::{BackendError, BoxError, FileBackend, FsStats};
pub use config::{
    ConfigError, DEFAULT_BLOCK_SIZE, DEFAULT_EVICT_BATCH, DEFAULT_FORMAT_VERSION, DEFAULT_IV_SIZE,
    DEFAULT_MAX_IDLE, EvictionPolicy, KEY_LENGTH, TableConfig, TableKey, TableOptions,
};
pub use error::{FileTableError, FlushFailure};
pub use guard::{DualFileLockGuard, FileLockGuard};
pub use handle::{FileHandle, RawFile};
pub use id::{FileId, FileKind, ID_LENGTH};
pub use node::{FileNode, FileObject};
pub use stats::{FileTableStats, FileTableStatsSnapshot};
pub use table::{FileTable, SweepReport, TeardownReport};
