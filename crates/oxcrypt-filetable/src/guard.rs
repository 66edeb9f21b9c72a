//! Lock guards over file objects.
//!
//! Each resident object owns one mutex. [`FileLockGuard`] holds it for a
//! single object. [`DualFileLockGuard`] holds the mutexes of two objects for
//! operations such as link or rename that touch both; it always locks in
//! identifier order, so two threads locking the same pair in opposite
//! argument order cannot deadlock. Code that needs two objects locked at once
//! must use it rather than nesting two single guards.
//!
//! Neither guard touches the table lock.

use std::fmt;
use std::ops::{Deref, DerefMut};

use parking_lot::MutexGuard;

use crate::backend::FileBackend;
use crate::handle::FileHandle;
use crate::id::{FileId, FileKind};
use crate::node::{FileNode, FileObject};

/// Exclusive access to one file object.
pub struct FileLockGuard<'h, B: FileBackend> {
    node: &'h FileNode<B>,
    object: MutexGuard<'h, FileObject<B>>,
}

impl<'h, B: FileBackend> FileLockGuard<'h, B> {
    /// Block until the object behind `handle` is free, then lock it.
    pub fn new(handle: &'h FileHandle<'_, B>) -> Self {
        let node = handle.node();
        Self {
            node,
            object: node.lock(),
        }
    }

    pub fn id(&self) -> &FileId {
        self.node.id()
    }

    pub fn kind(&self) -> FileKind {
        self.node.kind()
    }
}

impl<B: FileBackend> Deref for FileLockGuard<'_, B> {
    type Target = FileObject<B>;

    fn deref(&self) -> &FileObject<B> {
        &self.object
    }
}

impl<B: FileBackend> DerefMut for FileLockGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut FileObject<B> {
        &mut self.object
    }
}

impl<B: FileBackend> fmt::Debug for FileLockGuard<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLockGuard")
            .field("id", self.node.id())
            .field("kind", &self.node.kind())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to two file objects at once.
///
/// Accessors follow argument order: `left` is the first handle passed to
/// [`new`](Self::new), `right` the second. When both handles reference the
/// same object it is locked once and `left` and `right` are the same state.
pub struct DualFileLockGuard<'h, B: FileBackend> {
    left: &'h FileNode<B>,
    right: &'h FileNode<B>,
    first: MutexGuard<'h, FileObject<B>>,
    /// `None` when both handles reference the same object.
    second: Option<MutexGuard<'h, FileObject<B>>>,
    left_is_first: bool,
}

impl<'h, B: FileBackend> DualFileLockGuard<'h, B> {
    /// Lock the objects behind both handles in a deadlock-free order.
    pub fn new(left: &'h FileHandle<'_, B>, right: &'h FileHandle<'_, B>) -> Self {
        let left = left.node();
        let right = right.node();

        if std::ptr::eq(left, right) {
            return Self {
                left,
                right,
                first: left.lock(),
                second: None,
                left_is_first: true,
            };
        }

        let left_is_first = left.lock_order_key() < right.lock_order_key();
        let (first, second) = if left_is_first {
            (left, right)
        } else {
            (right, left)
        };
        let first = first.lock();
        let second = second.lock();
        Self {
            left,
            right,
            first,
            second: Some(second),
            left_is_first,
        }
    }

    /// Whether both handles reference the same object.
    pub fn is_aliased(&self) -> bool {
        self.second.is_none()
    }

    pub fn left_id(&self) -> &FileId {
        self.left.id()
    }

    pub fn right_id(&self) -> &FileId {
        self.right.id()
    }

    pub fn left(&self) -> &FileObject<B> {
        match (&self.second, self.left_is_first) {
            (Some(second), false) => &**second,
            _ => &*self.first,
        }
    }

    pub fn right(&self) -> &FileObject<B> {
        match (&self.second, self.left_is_first) {
            (Some(second), true) => &**second,
            _ => &*self.first,
        }
    }

    pub fn left_mut(&mut self) -> &mut FileObject<B> {
        match (&mut self.second, self.left_is_first) {
            (Some(second), false) => &mut **second,
            _ => &mut *self.first,
        }
    }

    pub fn right_mut(&mut self) -> &mut FileObject<B> {
        match (&mut self.second, self.left_is_first) {
            (Some(second), true) => &mut **second,
            _ => &mut *self.first,
        }
    }

    /// Both objects mutably, in argument order.
    ///
    /// Returns `None` for an aliased pair, which has only one object to hand
    /// out; use [`left_mut`](Self::left_mut) there.
    pub fn pair_mut(&mut self) -> Option<(&mut FileObject<B>, &mut FileObject<B>)> {
        let second = &mut **self.second.as_mut()?;
        let first = &mut *self.first;
        if self.left_is_first {
            Some((first, second))
        } else {
            Some((second, first))
        }
    }
}

impl<B: FileBackend> fmt::Debug for DualFileLockGuard<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualFileLockGuard")
            .field("left", self.left.id())
            .field("right", self.right.id())
            .field("aliased", &self.is_aliased())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TableConfig, TableKey};
    use crate::table::FileTable;
    use crate::testing::{MemoryBackend, test_id};

    fn table() -> FileTable<MemoryBackend> {
        FileTable::new(MemoryBackend::new(), TableConfig::new(TableKey::new([2; 32]))).unwrap()
    }

    #[test]
    fn test_single_guard_locks_and_unlocks() {
        let table = table();
        let handle = table.create_as(&test_id(1), FileKind::RegularFile).unwrap();
        {
            let mut guard = handle.lock();
            assert!(handle.is_locked());
            assert_eq!(guard.id(), &test_id(1));
            guard.as_regular_mut().unwrap().write_at(0, b"hello");
        }
        assert!(!handle.is_locked());
        assert_eq!(handle.lock().as_regular().unwrap().contents(), b"hello");
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn fails_midway(handle: &FileHandle<'_, MemoryBackend>) -> Result<(), &'static str> {
            let mut guard = handle.lock();
            guard.as_regular_mut().ok_or("not a regular file")?.write_at(0, b"x");
            Err("bail out")
        }

        let table = table();
        let handle = table.create_as(&test_id(2), FileKind::RegularFile).unwrap();
        assert!(fails_midway(&handle).is_err());
        assert!(!handle.is_locked());
    }

    #[test]
    fn test_dual_guard_argument_order() {
        let table = table();
        let low = table.create_as(&test_id(1), FileKind::Directory).unwrap();
        let high = table.create_as(&test_id(2), FileKind::RegularFile).unwrap();

        // Passed high-first, accessors still follow argument order
        let mut guard = DualFileLockGuard::new(&high, &low);
        assert!(!guard.is_aliased());
        assert_eq!(guard.left_id(), &test_id(2));
        assert!(guard.left().is_regular());
        assert!(guard.right().is_directory());
        assert!(low.is_locked() && high.is_locked());

        let (left, right) = guard.pair_mut().unwrap();
        left.as_regular_mut().unwrap().write_at(0, b"data");
        right
            .as_directory_mut()
            .unwrap()
            .insert("data".to_string(), test_id(2), FileKind::RegularFile);
        drop(guard);

        assert!(!low.is_locked() && !high.is_locked());
    }

    #[test]
    fn test_dual_guard_aliased_locks_once() {
        let table = table();
        let a1 = table.create_as(&test_id(3), FileKind::Directory).unwrap();
        let a2 = table.open_as(&test_id(3), FileKind::Directory).unwrap();

        // Would self-deadlock if the mutex were taken twice
        let mut guard = DualFileLockGuard::new(&a1, &a2);
        assert!(guard.is_aliased());
        assert!(guard.pair_mut().is_none());
        guard
            .left_mut()
            .as_directory_mut()
            .unwrap()
            .insert("x".to_string(), test_id(9), FileKind::Symlink);
        assert_eq!(guard.right().as_directory().unwrap().len(), 1);

        drop(guard);
        let same = DualFileLockGuard::new(&a1, &a1);
        assert!(same.is_aliased());
    }
}
