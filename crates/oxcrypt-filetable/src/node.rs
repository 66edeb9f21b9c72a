//! Resident file objects.
//!
//! A [`FileNode`] is the single in-memory representation of one persisted
//! object. It pairs the immutable identity (id and kind) with one mutex
//! around the backend state. Every kind-specific view borrows through that
//! same mutex, so there is exactly one lock per object no matter how the
//! caller looks at it.

use std::fmt;

use parking_lot::{Mutex, MutexGuard};

use crate::backend::FileBackend;
use crate::id::{FileId, FileKind};

/// Backend state of one object, by kind.
pub enum FileObject<B: FileBackend + ?Sized> {
    Regular(B::Regular),
    Symlink(B::Symlink),
    Directory(B::Directory),
}

impl<B: FileBackend + ?Sized> FileObject<B> {
    pub fn kind(&self) -> FileKind {
        match self {
            FileObject::Regular(_) => FileKind::RegularFile,
            FileObject::Symlink(_) => FileKind::Symlink,
            FileObject::Directory(_) => FileKind::Directory,
        }
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, FileObject::Regular(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileObject::Symlink(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileObject::Directory(_))
    }

    pub fn as_regular(&self) -> Option<&B::Regular> {
        match self {
            FileObject::Regular(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_regular_mut(&mut self) -> Option<&mut B::Regular> {
        match self {
            FileObject::Regular(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&B::Symlink> {
        match self {
            FileObject::Symlink(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symlink_mut(&mut self) -> Option<&mut B::Symlink> {
        match self {
            FileObject::Symlink(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_directory(&self) -> Option<&B::Directory> {
        match self {
            FileObject::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut B::Directory> {
        match self {
            FileObject::Directory(d) => Some(d),
            _ => None,
        }
    }
}

impl<B: FileBackend + ?Sized> fmt::Debug for FileObject<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileObject::Regular(_) => "Regular",
            FileObject::Symlink(_) => "Symlink",
            FileObject::Directory(_) => "Directory",
        };
        f.debug_tuple(name).finish_non_exhaustive()
    }
}

/// A file object resident in a [`FileTable`](crate::FileTable).
///
/// Nodes are only reachable through a [`FileHandle`](crate::FileHandle).
/// Their state is only reachable through a lock guard.
pub struct FileNode<B: FileBackend> {
    id: FileId,
    kind: FileKind,
    object: Mutex<FileObject<B>>,
}

impl<B: FileBackend> FileNode<B> {
    pub(crate) fn new(id: FileId, object: FileObject<B>) -> Self {
        Self {
            id,
            kind: object.kind(),
            object: Mutex::new(object),
        }
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Whether the object lock is currently held by anyone.
    pub fn is_locked(&self) -> bool {
        self.object.is_locked()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, FileObject<B>> {
        self.object.lock()
    }

    /// Total order used when two nodes must be locked together.
    ///
    /// Identifier first; the address only separates distinct nodes that
    /// share an id, which the table never lets coexist.
    pub(crate) fn lock_order_key(&self) -> (FileId, usize) {
        (self.id, std::ptr::from_ref(self) as usize)
    }
}

impl<B: FileBackend> fmt::Debug for FileNode<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}
