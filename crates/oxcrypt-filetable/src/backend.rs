//! The storage-facing collaborator of the file table.
//!
//! A [`FileBackend`] knows how to turn an identifier into a decrypted,
//! in-memory object and how to persist that object again. The table never
//! looks inside the objects it caches; it only decides *when* the backend is
//! asked to build or finalize one.

use std::io;

use thiserror::Error;

use crate::config::TableConfig;
use crate::id::{FileId, FileKind};
use crate::node::FileObject;

/// Boxed error for backend failures that don't fit the other variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by a [`FileBackend`].
#[derive(Error, Debug)]
pub enum BackendError {
    /// The object does not exist and was not asked to be created.
    #[error("Object does not exist")]
    NotFound,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Stored data failed to decode or authenticate.
    #[error("Stored object is corrupted: {reason}")]
    Corrupted { reason: String },

    #[error(transparent)]
    Other(BoxError),
}

impl BackendError {
    pub fn other(err: impl Into<BoxError>) -> Self {
        BackendError::Other(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            BackendError::NotFound => true,
            BackendError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Filesystem capacity figures, as reported by `statfs(2)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u64,
    pub fragment_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u64,
}

/// Builds, persists and describes file objects for a [`FileTable`](crate::FileTable).
///
/// Each associated type holds the backend-specific state of one object kind
/// (open block cipher streams, decoded directory entries, and so on). The
/// table wraps whichever variant `materialize` returns in a single mutex, so
/// these types need no locking of their own.
///
/// Both `materialize` and `finalize` may block on I/O. The table never calls
/// them while holding its own lock.
pub trait FileBackend: Send + Sync {
    type Regular: Send + 'static;
    type Symlink: Send + 'static;
    type Directory: Send + 'static;

    /// Load the object named `id`, or create it when `create` is set.
    ///
    /// Must return [`BackendError::NotFound`] for a missing object when
    /// `create` is false. The returned variant must match `kind`.
    fn materialize(
        &self,
        id: &FileId,
        kind: FileKind,
        create: bool,
        config: &TableConfig,
    ) -> Result<FileObject<Self>, BackendError>;

    /// Flush `object` back to storage before it is dropped.
    fn finalize(&self, id: &FileId, object: &mut FileObject<Self>) -> Result<(), BackendError>;

    /// Capacity of the underlying storage.
    fn statfs(&self) -> Result<FsStats, BackendError>;
}
