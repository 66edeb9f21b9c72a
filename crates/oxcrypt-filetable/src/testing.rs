//! Test support: an in-memory [`FileBackend`].
//!
//! [`MemoryBackend`] stores objects in a map instead of encrypted blocks and
//! records every call the table makes, so tests can check *when* objects are
//! built and flushed. Each materialized object carries an instance serial,
//! which tells a reused node apart from a freshly loaded one.
//!
//! Failures and one-shot panics can be injected per identifier, and
//! materialization can be slowed down to widen race windows in concurrency
//! tests.
//!
//! # Usage
//!
//! ```
//! use oxcrypt_filetable::testing::{test_id, MemoryBackend};
//! use oxcrypt_filetable::{FileKind, FileTable, TableConfig, TableKey};
//!
//! let backend = MemoryBackend::new();
//! backend.insert_regular(test_id(1), b"stored".to_vec());
//!
//! let table = FileTable::new(backend, TableConfig::new(TableKey::new([0; 32])))?;
//! let handle = table.open_as(&test_id(1), FileKind::RegularFile)?;
//! assert_eq!(handle.lock().as_regular().unwrap().contents(), b"stored");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{BackendError, FileBackend, FsStats};
use crate::config::TableConfig;
use crate::id::{FileId, FileKind, ID_LENGTH};
use crate::node::FileObject;

/// Identifier whose leading bytes hold `n` big-endian, so ids sort like `n`.
pub fn test_id(n: u32) -> FileId {
    let mut bytes = [0u8; ID_LENGTH];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    bytes[ID_LENGTH - 1] = 0x5a;
    FileId::from_bytes(bytes)
}

#[derive(Debug, Clone)]
enum Stored {
    Regular(Vec<u8>),
    Symlink(String),
    Directory(BTreeMap<String, (FileId, FileKind)>),
}

impl Stored {
    fn empty(kind: FileKind) -> Self {
        match kind {
            FileKind::RegularFile => Stored::Regular(Vec::new()),
            FileKind::Symlink => Stored::Symlink(String::new()),
            FileKind::Directory => Stored::Directory(BTreeMap::new()),
        }
    }
}

/// Regular file contents.
#[derive(Debug)]
pub struct MemoryFile {
    instance: u64,
    data: Vec<u8>,
}

impl MemoryFile {
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write `buf` at `offset`, zero-filling any gap.
    ///
    /// # Panics
    ///
    /// If `offset + buf.len()` overflows `usize`, like slice indexing would.
    pub fn write_at(&mut self, offset: usize, buf: &[u8]) {
        let Some(end) = offset.checked_add(buf.len()) else {
            panic!("write of {} bytes at offset {offset} overflows", buf.len());
        };
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.resize(len, 0);
    }
}

/// Symlink target.
#[derive(Debug)]
pub struct MemorySymlink {
    instance: u64,
    target: String,
}

impl MemorySymlink {
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }
}

/// Directory entries, by name.
#[derive(Debug)]
pub struct MemoryDirectory {
    instance: u64,
    entries: BTreeMap<String, (FileId, FileKind)>,
}

impl MemoryDirectory {
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn get(&self, name: &str) -> Option<(FileId, FileKind)> {
        self.entries.get(name).copied()
    }

    /// Add or replace an entry, returning the previous one.
    pub fn insert(&mut self, name: String, id: FileId, kind: FileKind) -> Option<(FileId, FileKind)> {
        self.entries.insert(name, (id, kind))
    }

    pub fn remove(&mut self, name: &str) -> Option<(FileId, FileKind)> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory backend that records what the table asks of it.
#[derive(Debug)]
pub struct MemoryBackend {
    store: Mutex<HashMap<FileId, Stored>>,
    materialize_calls: AtomicUsize,
    finalized: Mutex<Vec<FileId>>,
    next_instance: AtomicU64,
    fail_materialize: Mutex<HashSet<FileId>>,
    fail_finalize: Mutex<HashSet<FileId>>,
    panic_materialize: Mutex<HashSet<FileId>>,
    panic_finalize: Mutex<HashSet<FileId>>,
    materialize_delay: Mutex<Option<Duration>>,
    fs_stats: FsStats,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            materialize_calls: AtomicUsize::new(0),
            finalized: Mutex::new(Vec::new()),
            next_instance: AtomicU64::new(1),
            fail_materialize: Mutex::new(HashSet::new()),
            fail_finalize: Mutex::new(HashSet::new()),
            panic_materialize: Mutex::new(HashSet::new()),
            panic_finalize: Mutex::new(HashSet::new()),
            materialize_delay: Mutex::new(None),
            fs_stats: FsStats {
                block_size: 4096,
                fragment_size: 4096,
                blocks: 1 << 20,
                blocks_free: 1 << 19,
                blocks_available: 1 << 19,
                files: 1 << 16,
                files_free: 1 << 15,
                name_max: 255,
            },
        }
    }

    /// Seed a regular file as if it had been persisted earlier.
    pub fn insert_regular(&self, id: FileId, data: Vec<u8>) {
        self.store.lock().insert(id, Stored::Regular(data));
    }

    pub fn insert_symlink(&self, id: FileId, target: impl Into<String>) {
        self.store.lock().insert(id, Stored::Symlink(target.into()));
    }

    pub fn insert_directory(&self, id: FileId) {
        self.store.lock().insert(id, Stored::Directory(BTreeMap::new()));
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.store.lock().contains_key(id)
    }

    /// Persisted contents of a regular file.
    pub fn stored_regular(&self, id: &FileId) -> Option<Vec<u8>> {
        match self.store.lock().get(id) {
            Some(Stored::Regular(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn stored_symlink(&self, id: &FileId) -> Option<String> {
        match self.store.lock().get(id) {
            Some(Stored::Symlink(target)) => Some(target.clone()),
            _ => None,
        }
    }

    /// Persisted entry names of a directory.
    pub fn stored_directory(&self, id: &FileId) -> Option<Vec<String>> {
        match self.store.lock().get(id) {
            Some(Stored::Directory(entries)) => Some(entries.keys().cloned().collect()),
            _ => None,
        }
    }

    pub fn materialize_count(&self) -> usize {
        self.materialize_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_count(&self) -> usize {
        self.finalized.lock().len()
    }

    /// Identifiers passed to `finalize`, in call order.
    pub fn finalized_ids(&self) -> Vec<FileId> {
        self.finalized.lock().clone()
    }

    pub fn fail_materialize_for(&self, id: FileId) {
        self.fail_materialize.lock().insert(id);
    }

    pub fn fail_finalize_for(&self, id: FileId) {
        self.fail_finalize.lock().insert(id);
    }

    /// Panic inside the next `materialize` of `id`, once.
    pub fn panic_materialize_once(&self, id: FileId) {
        self.panic_materialize.lock().insert(id);
    }

    /// Panic inside the next `finalize` of `id`, once.
    pub fn panic_finalize_once(&self, id: FileId) {
        self.panic_finalize.lock().insert(id);
    }

    pub fn clear_failures(&self) {
        self.fail_materialize.lock().clear();
        self.fail_finalize.lock().clear();
    }

    /// Sleep this long inside every `materialize` call.
    pub fn set_materialize_delay(&self, delay: Duration) {
        *self.materialize_delay.lock() = Some(delay);
    }

    pub fn fs_stats(&self) -> FsStats {
        self.fs_stats
    }

    fn next_instance(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::Relaxed)
    }
}

impl FileBackend for MemoryBackend {
    type Regular = MemoryFile;
    type Symlink = MemorySymlink;
    type Directory = MemoryDirectory;

    fn materialize(
        &self,
        id: &FileId,
        kind: FileKind,
        create: bool,
        _config: &TableConfig,
    ) -> Result<FileObject<Self>, BackendError> {
        self.materialize_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.materialize_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if self.panic_materialize.lock().remove(id) {
            panic!("injected materialize panic for {id}");
        }
        if self.fail_materialize.lock().contains(id) {
            return Err(BackendError::Io(io::Error::other("injected materialize failure")));
        }

        let stored = {
            let mut store = self.store.lock();
            match store.get(id) {
                Some(stored) => stored.clone(),
                None if create => {
                    let stored = Stored::empty(kind);
                    store.insert(*id, stored.clone());
                    stored
                }
                None => return Err(BackendError::NotFound),
            }
        };

        // Hand back whatever is stored; the table rejects a kind mismatch
        let instance = self.next_instance();
        Ok(match stored {
            Stored::Regular(data) => FileObject::Regular(MemoryFile { instance, data }),
            Stored::Symlink(target) => FileObject::Symlink(MemorySymlink { instance, target }),
            Stored::Directory(entries) => {
                FileObject::Directory(MemoryDirectory { instance, entries })
            }
        })
    }

    fn finalize(&self, id: &FileId, object: &mut FileObject<Self>) -> Result<(), BackendError> {
        self.finalized.lock().push(*id);
        if self.panic_finalize.lock().remove(id) {
            panic!("injected finalize panic for {id}");
        }
        if self.fail_finalize.lock().contains(id) {
            return Err(BackendError::Io(io::Error::other("injected flush failure")));
        }

        let stored = match object {
            FileObject::Regular(file) => Stored::Regular(file.data.clone()),
            FileObject::Symlink(link) => Stored::Symlink(link.target.clone()),
            FileObject::Directory(dir) => Stored::Directory(dir.entries.clone()),
        };
        self.store.lock().insert(*id, stored);
        Ok(())
    }

    fn statfs(&self) -> Result<FsStats, BackendError> {
        Ok(self.fs_stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableKey;

    fn config() -> TableConfig {
        TableConfig::new(TableKey::new([0; 32]))
    }

    #[test]
    fn test_ids_sort_numerically() {
        assert!(test_id(1) < test_id(2));
        assert!(test_id(255) < test_id(256));
        assert_ne!(test_id(0), FileId::ROOT);
    }

    #[test]
    fn test_materialize_missing() {
        let backend = MemoryBackend::new();
        let err = backend
            .materialize(&test_id(1), FileKind::RegularFile, false, &config())
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!backend.contains(&test_id(1)));
        assert_eq!(backend.materialize_count(), 1);
    }

    #[test]
    fn test_finalize_persists_changes() {
        let backend = MemoryBackend::new();
        let id = test_id(2);
        let mut object = backend
            .materialize(&id, FileKind::RegularFile, true, &config())
            .unwrap();
        object.as_regular_mut().unwrap().write_at(2, b"hi");
        backend.finalize(&id, &mut object).unwrap();

        assert_eq!(backend.stored_regular(&id), Some(vec![0, 0, b'h', b'i']));
        assert_eq!(backend.finalized_ids(), vec![id]);
    }

    #[test]
    fn test_instances_are_distinct() {
        let backend = MemoryBackend::new();
        backend.insert_symlink(test_id(3), "target");
        let a = backend
            .materialize(&test_id(3), FileKind::Symlink, false, &config())
            .unwrap();
        let b = backend
            .materialize(&test_id(3), FileKind::Symlink, false, &config())
            .unwrap();
        assert_ne!(
            a.as_symlink().unwrap().instance(),
            b.as_symlink().unwrap().instance()
        );
        assert_eq!(a.as_symlink().unwrap().target(), "target");
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn test_write_at_rejects_overflowing_offset() {
        let backend = MemoryBackend::new();
        let mut object = backend
            .materialize(&test_id(5), FileKind::RegularFile, true, &config())
            .unwrap();
        object.as_regular_mut().unwrap().write_at(usize::MAX, b"x");
    }

    #[test]
    fn test_panic_injection_fires_once() {
        let backend = MemoryBackend::new();
        backend.panic_materialize_once(test_id(6));
        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            backend.materialize(&test_id(6), FileKind::Symlink, true, &config())
        }));
        assert!(first.is_err());
        assert!(
            backend
                .materialize(&test_id(6), FileKind::Symlink, true, &config())
                .is_ok()
        );
    }

    #[test]
    fn test_stored_kind_wins() {
        let backend = MemoryBackend::new();
        backend.insert_directory(test_id(4));
        let object = backend
            .materialize(&test_id(4), FileKind::RegularFile, true, &config())
            .unwrap();
        assert_eq!(object.kind(), FileKind::Directory);
    }
}
