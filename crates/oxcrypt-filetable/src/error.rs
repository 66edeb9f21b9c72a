//! Error types for the file table.

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::id::{FileId, FileKind};

/// A backend flush that failed while an object was being evicted or torn down.
///
/// The object has already been dropped by the time this is reported; any
/// unflushed changes it held are lost.
#[derive(Debug)]
pub struct FlushFailure {
    pub id: FileId,
    pub kind: FileKind,
    pub source: BackendError,
}

impl fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.id, self.source)
    }
}

/// Errors returned by [`FileTable`](crate::FileTable) operations.
#[derive(Error, Debug)]
pub enum FileTableError {
    /// Opened without `create` and the backend has no such object.
    #[error("No object with id {id}")]
    NotFound { id: FileId },

    /// The resident object is of a different kind than requested.
    #[error("Object {id} is a {actual}, expected a {expected}")]
    TypeMismatch {
        id: FileId,
        expected: FileKind,
        actual: FileKind,
    },

    /// Create was requested but an object of another kind already owns the id.
    #[error("Object {id} already exists as a {existing}")]
    AlreadyExists { id: FileId, existing: FileKind },

    /// The backend failed to load or create the object.
    #[error("Backend failed for object {id}: {source}")]
    Backend {
        id: FileId,
        #[source]
        source: BackendError,
    },

    /// Objects evicted by this close could not be flushed.
    #[error("Failed to flush {} evicted object(s): {}", .failures.len(), join_failures(.failures))]
    Eviction { failures: Vec<FlushFailure> },

    /// A close for an object that has no outstanding reference.
    ///
    /// This is a caller bug (double close, or a reference from another table).
    #[error("Object {id} is not open in this table")]
    NotOpen { id: FileId },

    #[error("File table has been shut down")]
    ShutDown,
}

impl FileTableError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FileTableError::NotFound { .. })
    }

    /// The object this error concerns, if it concerns a single one.
    pub fn id(&self) -> Option<&FileId> {
        match self {
            FileTableError::NotFound { id }
            | FileTableError::TypeMismatch { id, .. }
            | FileTableError::AlreadyExists { id, .. }
            | FileTableError::Backend { id, .. }
            | FileTableError::NotOpen { id } => Some(id),
            FileTableError::Eviction { .. } | FileTableError::ShutDown => None,
        }
    }
}

fn join_failures(failures: &[FlushFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_id() {
        let id = FileId::from_bytes([0xcd; 32]);
        let err = FileTableError::TypeMismatch {
            id,
            expected: FileKind::Directory,
            actual: FileKind::RegularFile,
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_hex()));
        assert!(msg.contains("is a regular file, expected a directory"));
        assert_eq!(err.id(), Some(&id));
    }

    #[test]
    fn test_eviction_lists_failures() {
        let err = FileTableError::Eviction {
            failures: vec![
                FlushFailure {
                    id: FileId::from_bytes([1; 32]),
                    kind: FileKind::RegularFile,
                    source: BackendError::other("write failed"),
                },
                FlushFailure {
                    id: FileId::from_bytes([2; 32]),
                    kind: FileKind::Directory,
                    source: BackendError::other("no space"),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to flush 2 evicted object(s)"));
        assert!(msg.contains("write failed"));
        assert!(msg.contains("no space"));
        assert!(err.id().is_none());
    }

    #[test]
    fn test_backend_source_is_preserved() {
        use std::error::Error as _;

        let err = FileTableError::Backend {
            id: FileId::ROOT,
            source: BackendError::Corrupted {
                reason: "header tag mismatch".into(),
            },
        };
        let source = err.source().expect("source");
        assert!(source.to_string().contains("header tag mismatch"));
    }
}
