//! Scoped references into a [`FileTable`].
//!
//! A [`FileHandle`] stands for one reference counted by the table. Dropping
//! it closes that reference exactly once. Handles are move-only; the only
//! way to get a second reference to the same object is to open it again.
//!
//! [`FileHandle::release`] turns a handle into a [`RawFile`], a reference
//! with no table attached, for callers that must park it somewhere the
//! borrow checker cannot follow (a FUSE `fh` slot, for example). Whoever
//! holds a `RawFile` owes the table a [`FileTable::close`] or
//! [`FileTable::adopt`]; dropping it leaks the reference until teardown.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::warn;

use crate::backend::FileBackend;
use crate::error::FileTableError;
use crate::guard::FileLockGuard;
use crate::id::{FileId, FileKind};
use crate::node::FileNode;
use crate::table::FileTable;

/// An open reference to a resident file object.
pub struct FileHandle<'t, B: FileBackend> {
    table: &'t FileTable<B>,
    /// `None` only transiently, once the reference has been handed off.
    node: Option<Arc<FileNode<B>>>,
}

impl<'t, B: FileBackend> FileHandle<'t, B> {
    pub(crate) fn new(table: &'t FileTable<B>, node: Arc<FileNode<B>>) -> Self {
        Self {
            table,
            node: Some(node),
        }
    }

    pub fn table(&self) -> &'t FileTable<B> {
        self.table
    }

    pub fn node(&self) -> &FileNode<B> {
        match &self.node {
            Some(node) => node,
            None => unreachable!("file handle used after its reference was handed off"),
        }
    }

    pub fn id(&self) -> &FileId {
        self.node().id()
    }

    pub fn kind(&self) -> FileKind {
        self.node().kind()
    }

    /// The node, if it is of the given kind.
    pub fn get_as(&self, kind: FileKind) -> Option<&FileNode<B>> {
        let node = self.node();
        (node.kind() == kind).then_some(node)
    }

    /// Whether both handles reference the same in-memory object.
    pub fn is_same_object(&self, other: &FileHandle<'_, B>) -> bool {
        std::ptr::eq(self.node(), other.node())
    }

    /// Lock the object for exclusive access.
    pub fn lock(&self) -> FileLockGuard<'_, B> {
        FileLockGuard::new(self)
    }

    /// Detach the reference without closing it.
    pub fn release(mut self) -> RawFile<B> {
        RawFile(self.take_node())
    }

    /// Close the current reference and take over `raw` instead.
    ///
    /// The new reference is installed even if closing the old one reports
    /// eviction failures. As with [`close`](Self::close), those failures are
    /// about other evicted objects.
    pub fn reset(&mut self, raw: RawFile<B>) -> Result<(), FileTableError> {
        match self.node.replace(raw.0) {
            Some(old) => self.table.release(old),
            None => Ok(()),
        }
    }

    /// Close the reference now, reporting eviction failures it caused.
    ///
    /// The reference is always released. [`FileTableError::Eviction`]
    /// concerns *other* idle objects this close pushed out of the cache, not
    /// the one this handle pointed at; [`FileTableError::NotOpen`] means the
    /// handle was adopted into the wrong table. Dropping the handle does the
    /// same but only logs failures.
    pub fn close(mut self) -> Result<(), FileTableError> {
        let node = self.take_node();
        self.table.release(node)
    }

    fn take_node(&mut self) -> Arc<FileNode<B>> {
        match self.node.take() {
            Some(node) => node,
            None => unreachable!("file handle used after its reference was handed off"),
        }
    }
}

impl<B: FileBackend> Deref for FileHandle<'_, B> {
    type Target = FileNode<B>;

    fn deref(&self) -> &FileNode<B> {
        self.node()
    }
}

impl<B: FileBackend> Drop for FileHandle<'_, B> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            let id = *node.id();
            if let Err(err) = self.table.release(node) {
                warn!(id = %id, error = %err, "Error while closing file handle");
            }
        }
    }
}

impl<B: FileBackend> fmt::Debug for FileHandle<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// A table reference detached from its handle.
///
/// Not `Clone`: each `RawFile` is exactly one counted reference.
#[must_use = "a RawFile holds a table reference; pass it to FileTable::close or FileTable::adopt"]
pub struct RawFile<B: FileBackend>(Arc<FileNode<B>>);

impl<B: FileBackend> RawFile<B> {
    pub fn id(&self) -> &FileId {
        self.0.id()
    }

    pub fn kind(&self) -> FileKind {
        self.0.kind()
    }

    pub(crate) fn into_node(self) -> Arc<FileNode<B>> {
        self.0
    }
}

impl<B: FileBackend> fmt::Debug for RawFile<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawFile").field(&self.0).finish()
    }
}
