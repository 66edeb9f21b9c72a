//! The open-file table.
//!
//! [`FileTable`] keeps exactly one [`FileNode`] per identifier while anyone
//! holds a reference to it, and keeps a bounded number of unreferenced nodes
//! around afterwards so that reopening a recently closed file skips the
//! backend entirely.
//!
//! # Locking
//!
//! A single table mutex guards the slot map and the idle queue. It is held
//! only for bookkeeping: backend `materialize` and `finalize` calls, and any
//! per-object lock, always run with it released. While the backend works on
//! an identifier the slot is parked as *settling*, and other openers of the
//! same identifier wait on a condvar until it settles. This keeps both
//! guarantees at once:
//!
//! - one identifier is never materialized twice concurrently;
//! - an object being flushed on eviction cannot be reloaded until the flush
//!   has finished.
//!
//! # Idle cache
//!
//! When the last reference to a node is closed its id is appended to the idle
//! queue. If that pushes the queue past [`EvictionPolicy::max_idle`], the
//! closing thread detaches the oldest [`EvictionPolicy::evict_batch`] entries
//! and finalizes them itself. The queue is keyed by a close sequence number
//! that each idle resident remembers, so reactivation and eviction stay
//! logarithmic however large the cap is.
//!
//! # Panics in the backend
//!
//! A backend call that unwinds still settles its slots: the placeholder is
//! removed and waiters are woken, so the id can be opened again. An object
//! whose flush panicked is dropped like one whose flush failed.
//!
//! [`EvictionPolicy::max_idle`]: crate::EvictionPolicy::max_idle
//! [`EvictionPolicy::evict_batch`]: crate::EvictionPolicy::evict_batch

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, instrument, trace, warn};

use crate::backend::{BackendError, FileBackend, FsStats};
use crate::config::{ConfigError, TableConfig};
use crate::error::{FileTableError, FlushFailure};
use crate::handle::{FileHandle, RawFile};
use crate::id::{FileId, FileKind};
use crate::node::FileNode;
use crate::stats::FileTableStats;

struct Resident<B: FileBackend> {
    node: Arc<FileNode<B>>,
    refs: usize,
    /// Key into the idle queue while `refs == 0`.
    idle_seq: Option<u64>,
}

enum Slot<B: FileBackend> {
    Resident(Resident<B>),
    /// The backend is building this object.
    Loading,
    /// This object was evicted and is being flushed.
    Flushing,
}

struct TableState<B: FileBackend> {
    slots: HashMap<FileId, Slot<B>>,
    /// Unreferenced residents by close sequence, oldest first.
    idle: BTreeMap<u64, FileId>,
    next_idle_seq: u64,
    shut_down: bool,
}

/// Settles placeholder slots once the backend call that owns them is over.
///
/// Dropping it removes any of its ids still parked as loading or flushing and
/// wakes waiters. It runs on unwind too, so a panicking backend cannot leave
/// an id parked forever.
struct Settle<'t, B: FileBackend> {
    table: &'t FileTable<B>,
    ids: Vec<FileId>,
}

impl<'t, B: FileBackend> Settle<'t, B> {
    fn new(table: &'t FileTable<B>, ids: Vec<FileId>) -> Self {
        Self { table, ids }
    }

    /// The slots were resolved under the table lock; only wake waiters.
    fn resolved(mut self) {
        self.ids.clear();
    }
}

impl<B: FileBackend> Drop for Settle<'_, B> {
    fn drop(&mut self) {
        if !self.ids.is_empty() {
            if thread::panicking() {
                error!(count = self.ids.len(), "Backend panicked, releasing parked slots");
            }
            let mut state = self.table.state.lock();
            for id in &self.ids {
                if matches!(state.slots.get(id), Some(Slot::Loading | Slot::Flushing)) {
                    state.slots.remove(id);
                }
            }
        }
        self.table.settled.notify_all();
    }
}

/// Outcome of [`FileTable::shutdown`].
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Number of objects handed to the backend for finalization.
    pub finalized: usize,
    /// Objects that still had outstanding references.
    pub leaked: Vec<FileId>,
    /// Finalizations that failed.
    pub failures: Vec<FlushFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty() && self.failures.is_empty()
    }
}

/// Outcome of [`FileTable::garbage_collect`].
#[derive(Debug, Default)]
pub struct SweepReport {
    pub evicted: usize,
    pub failures: Vec<FlushFailure>,
}

/// Reference-counted cache of open file objects.
///
/// See the [module documentation](self) for the locking and eviction rules.
///
/// # Example
///
/// ```
/// use oxcrypt_filetable::testing::{test_id, MemoryBackend};
/// use oxcrypt_filetable::{FileKind, FileTable, TableConfig, TableKey};
///
/// let table = FileTable::new(MemoryBackend::new(), TableConfig::new(TableKey::new([0; 32])))?;
/// let id = test_id(1);
///
/// let first = table.create_as(&id, FileKind::RegularFile)?;
/// let second = table.open_as(&id, FileKind::RegularFile)?;
/// assert!(first.is_same_object(&second));
/// assert_eq!(table.refcount(&id), Some(2));
///
/// drop(first);
/// drop(second);
/// assert!(table.is_idle(&id));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct FileTable<B: FileBackend> {
    backend: B,
    config: TableConfig,
    state: Mutex<TableState<B>>,
    /// Signalled whenever a settling slot resolves.
    settled: Condvar,
    stats: FileTableStats,
}

impl<B: FileBackend> FileTable<B> {
    pub fn new(backend: B, config: TableConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            state: Mutex::new(TableState {
                slots: HashMap::new(),
                idle: BTreeMap::new(),
                next_idle_seq: 0,
                shut_down: false,
            }),
            settled: Condvar::new(),
            stats: FileTableStats::new(),
        })
    }

    /// Open `id` as `kind`, materializing it from the backend if it is not
    /// resident. With `create` set, a missing object is created.
    ///
    /// # Errors
    ///
    /// - [`FileTableError::NotFound`] if the object is missing and `create` is false
    /// - [`FileTableError::TypeMismatch`] if the object exists with another kind
    ///   and `create` is false
    /// - [`FileTableError::AlreadyExists`] if the object exists with another kind
    ///   and `create` is true
    /// - [`FileTableError::Backend`] if the backend failed
    /// - [`FileTableError::ShutDown`] after [`shutdown`](Self::shutdown)
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub fn open_or_create(
        &self,
        id: &FileId,
        kind: FileKind,
        create: bool,
    ) -> Result<FileHandle<'_, B>, FileTableError> {
        let node = self.acquire(*id, kind, create)?;
        Ok(FileHandle::new(self, node))
    }

    /// Open an existing object.
    pub fn open_as(&self, id: &FileId, kind: FileKind) -> Result<FileHandle<'_, B>, FileTableError> {
        self.open_or_create(id, kind, false)
    }

    /// Open an object, creating it if it does not exist yet.
    pub fn create_as(&self, id: &FileId, kind: FileKind) -> Result<FileHandle<'_, B>, FileTableError> {
        self.open_or_create(id, kind, true)
    }

    /// Give back a reference detached with [`FileHandle::release`].
    ///
    /// The reference is released either way. [`FileTableError::Eviction`]
    /// reports flush failures of other idle objects this close evicted, not a
    /// failure to close `raw`. A reference that is not open here gives
    /// [`FileTableError::NotOpen`].
    pub fn close(&self, raw: RawFile<B>) -> Result<(), FileTableError> {
        self.release(raw.into_node())
    }

    /// Wrap a detached reference in a handle again.
    ///
    /// `raw` must come from this table; a foreign reference is reported as
    /// [`FileTableError::NotOpen`] when the handle closes.
    pub fn adopt(&self, raw: RawFile<B>) -> FileHandle<'_, B> {
        FileHandle::new(self, raw.into_node())
    }

    /// Flush and drop every idle object now.
    #[instrument(level = "debug", skip(self))]
    pub fn garbage_collect(&self) -> SweepReport {
        let victims = {
            let mut state = self.state.lock();
            let count = state.idle.len();
            Self::detach_oldest(&mut state, count)
        };
        let evicted = victims.len();
        let failures = self.finalize_detached(victims);
        debug!(evicted, failed = failures.len(), "Idle sweep finished");
        SweepReport { evicted, failures }
    }

    /// Finalize every resident object and refuse further opens.
    ///
    /// Objects that are still referenced are finalized too and reported as
    /// leaked. Calling this twice is harmless; the second call does nothing.
    /// Dropping the table runs the same teardown if it has not happened yet.
    #[instrument(level = "debug", skip(self))]
    pub fn shutdown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let state = self.state.get_mut();
        if state.shut_down {
            return report;
        }
        state.shut_down = true;
        state.idle.clear();
        let slots = std::mem::take(&mut state.slots);

        for (id, slot) in slots {
            // Settling slots need a concurrent caller, which `&mut self` rules out
            let Slot::Resident(resident) = slot else {
                continue;
            };
            if resident.refs > 0 {
                warn!(id = %id, refs = resident.refs, "Object still referenced at teardown");
                self.stats.record_leaked_handle();
                report.leaked.push(id);
            }
            report.finalized += 1;
            if let Err(source) = self.finalize_node(&resident.node) {
                report.failures.push(FlushFailure {
                    id,
                    kind: resident.node.kind(),
                    source,
                });
            }
        }

        report.leaked.sort_unstable();
        debug!(
            finalized = report.finalized,
            leaked = report.leaked.len(),
            failed = report.failures.len(),
            "File table torn down"
        );
        report
    }

    pub fn is_readonly(&self) -> bool {
        self.config.options().read_only
    }

    pub fn is_auth_enabled(&self) -> bool {
        !self.config.options().no_authentication
    }

    pub fn is_time_stored(&self) -> bool {
        self.config.options().store_time
    }

    /// Storage capacity, straight from the backend.
    pub fn statfs(&self) -> Result<FsStats, BackendError> {
        self.backend.statfs()
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stats(&self) -> &FileTableStats {
        &self.stats
    }

    /// Number of resident objects, active and idle.
    pub fn resident_count(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Resident(_)))
            .count()
    }

    /// Number of resident objects with at least one reference.
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Resident(r) if r.refs > 0))
            .count()
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Outstanding references to `id`, or `None` if it is not resident.
    pub fn refcount(&self, id: &FileId) -> Option<usize> {
        match self.state.lock().slots.get(id) {
            Some(Slot::Resident(resident)) => Some(resident.refs),
            _ => None,
        }
    }

    pub fn is_idle(&self, id: &FileId) -> bool {
        matches!(
            self.state.lock().slots.get(id),
            Some(Slot::Resident(resident)) if resident.idle_seq.is_some()
        )
    }

    /// Idle identifiers, oldest first.
    pub fn idle_ids(&self) -> Vec<FileId> {
        self.state.lock().idle.values().copied().collect()
    }

    fn acquire(
        &self,
        id: FileId,
        kind: FileKind,
        create: bool,
    ) -> Result<Arc<FileNode<B>>, FileTableError> {
        let mut state = self.state.lock();
        loop {
            let TableState {
                slots,
                idle,
                shut_down,
                ..
            } = &mut *state;
            if *shut_down {
                return Err(FileTableError::ShutDown);
            }
            match slots.get_mut(&id) {
                Some(Slot::Resident(resident)) => {
                    let actual = resident.node.kind();
                    if actual != kind {
                        return Err(mismatch(id, kind, actual, create));
                    }
                    if resident.refs == 0 {
                        if let Some(seq) = resident.idle_seq.take() {
                            idle.remove(&seq);
                        }
                        self.stats.record_reactivation();
                        debug!("Reactivated idle object");
                    } else {
                        self.stats.record_active_hit();
                    }
                    resident.refs += 1;
                    self.stats.record_open();
                    trace!(refs = resident.refs, "Reference acquired");
                    return Ok(Arc::clone(&resident.node));
                }
                Some(Slot::Loading | Slot::Flushing) => {}
                None => break,
            }
            trace!("Waiting for object to settle");
            self.settled.wait(&mut state);
        }

        state.slots.insert(id, Slot::Loading);
        drop(state);
        let settle = Settle::new(self, vec![id]);
        debug!(%kind, create, "Materializing object");
        let loaded = self.backend.materialize(&id, kind, create, &self.config);
        let mut state = self.state.lock();

        let result = match loaded {
            Ok(object) if object.kind() == kind => {
                let node = Arc::new(FileNode::new(id, object));
                let previous = state.slots.insert(
                    id,
                    Slot::Resident(Resident {
                        node: Arc::clone(&node),
                        refs: 1,
                        idle_seq: None,
                    }),
                );
                debug_assert!(matches!(previous, Some(Slot::Loading)));
                self.stats.record_materialization();
                self.stats.record_open();
                trace!(refs = 1, "Reference acquired");
                Ok(node)
            }
            Ok(object) => {
                state.slots.remove(&id);
                Err(mismatch(id, kind, object.kind(), create))
            }
            Err(source) => {
                state.slots.remove(&id);
                if source.is_not_found() && !create {
                    self.stats.record_miss();
                    Err(FileTableError::NotFound { id })
                } else {
                    Err(FileTableError::Backend { id, source })
                }
            }
        };
        drop(state);
        settle.resolved();
        result
    }

    /// Drop one reference to `node`, evicting idle objects if that overflows
    /// the idle queue.
    pub(crate) fn release(&self, node: Arc<FileNode<B>>) -> Result<(), FileTableError> {
        let id = *node.id();
        let policy = self.config.policy();
        let mut state = self.state.lock();
        let TableState {
            slots,
            idle,
            next_idle_seq,
            ..
        } = &mut *state;

        let resident = match slots.get_mut(&id) {
            Some(Slot::Resident(resident)) if resident.refs > 0 && Arc::ptr_eq(&resident.node, &node) => {
                resident
            }
            _ => {
                error!(id = %id, "Close of an object that is not open in this table");
                return Err(FileTableError::NotOpen { id });
            }
        };
        resident.refs -= 1;
        trace!(id = %id, refs = resident.refs, "Reference released");
        if resident.refs > 0 {
            return Ok(());
        }

        let seq = *next_idle_seq;
        *next_idle_seq += 1;
        idle.insert(seq, id);
        resident.idle_seq = Some(seq);
        if idle.len() <= policy.max_idle {
            return Ok(());
        }

        let victims = Self::detach_oldest(&mut state, policy.evict_batch);
        drop(state);
        debug!(count = victims.len(), "Idle cache full, evicting oldest objects");
        let failures = self.finalize_detached(victims);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FileTableError::Eviction { failures })
        }
    }

    /// Pull up to `count` of the oldest idle objects out of the table, leaving
    /// their slots parked as flushing.
    fn detach_oldest(state: &mut TableState<B>, count: usize) -> Vec<Arc<FileNode<B>>> {
        let mut victims = Vec::with_capacity(count);
        while victims.len() < count {
            let Some((_, id)) = state.idle.pop_first() else {
                break;
            };
            match state.slots.remove(&id) {
                Some(Slot::Resident(resident)) if resident.refs == 0 => {
                    state.slots.insert(id, Slot::Flushing);
                    victims.push(resident.node);
                }
                Some(other) => {
                    error!(id = %id, "Idle queue entry is not an idle resident");
                    state.slots.insert(id, other);
                }
                None => error!(id = %id, "Idle queue entry has no slot"),
            }
        }
        victims
    }

    /// Finalize detached objects with the table lock released, then clear
    /// their parked slots.
    fn finalize_detached(&self, victims: Vec<Arc<FileNode<B>>>) -> Vec<FlushFailure> {
        if victims.is_empty() {
            return Vec::new();
        }

        let settle = Settle::new(self, victims.iter().map(|node| *node.id()).collect());
        self.stats.record_evictions(victims.len() as u64);
        let mut failures = Vec::new();
        for node in victims {
            if let Err(source) = self.finalize_node(&node) {
                failures.push(FlushFailure {
                    id: *node.id(),
                    kind: node.kind(),
                    source,
                });
            }
        }
        drop(settle);
        failures
    }

    fn finalize_node(&self, node: &FileNode<B>) -> Result<(), BackendError> {
        let mut object = node.lock();
        let result = self.backend.finalize(node.id(), &mut object);
        if let Err(err) = &result {
            self.stats.record_flush_failure();
            error!(
                id = %node.id(),
                kind = %node.kind(),
                error = %err,
                "Failed to flush object, unsaved changes are lost"
            );
        } else {
            trace!(id = %node.id(), "Object finalized");
        }
        result
    }
}

fn mismatch(id: FileId, expected: FileKind, actual: FileKind, create: bool) -> FileTableError {
    if create {
        FileTableError::AlreadyExists {
            id,
            existing: actual,
        }
    } else {
        FileTableError::TypeMismatch {
            id,
            expected,
            actual,
        }
    }
}

impl<B: FileBackend> Drop for FileTable<B> {
    fn drop(&mut self) {
        let report = self.shutdown();
        if !report.is_clean() {
            warn!(
                leaked = report.leaked.len(),
                failed = report.failures.len(),
                "File table dropped with leaked references or failed flushes"
            );
        }
    }
}

impl<B: FileBackend> fmt::Debug for FileTable<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FileTable")
            .field("slots", &state.slots.len())
            .field("idle", &state.idle.len())
            .field("shut_down", &state.shut_down)
            .field("policy", &self.config.policy())
            .finish_non_exhaustive()
    }
}
