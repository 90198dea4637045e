// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The batch executor.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::StorageConfig;
use crate::error::Error;
use crate::layout;
use crate::pages::PageCache;
use crate::storage::{
    GcStats, Key, MemoryMvccStore, MvccEntry, MvccStore, RocksMvccStore, StorageError, Value,
    Version,
};

use super::accessor::StorageAccessor;
use super::cancel::CancellationToken;
use super::ids::IdAllocator;
use super::transaction::{BatchId, Transaction};
use super::validation::CommitLog;

thread_local! {
    static IN_BATCH: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a batch until dropped.
struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Self {
        IN_BATCH.with(|flag| {
            if flag.replace(true) {
                panic!("nested batch: a unit of work must not open another batch on the same thread");
            }
        });
        ReentryGuard
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_BATCH.with(|flag| flag.set(false));
    }
}

/// Snapshot versions held by running batches, with their holder counts.
#[derive(Default)]
struct SnapshotRegistry {
    held: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotRegistry {
    fn oldest(&self) -> Option<Version> {
        self.held.lock().keys().next().map(|v| Version(*v))
    }

    fn active(&self) -> usize {
        self.held.lock().values().sum()
    }
}

/// Releases a registered snapshot when the batch ends, however it ends.
struct SnapshotGuard<'a> {
    registry: &'a SnapshotRegistry,
    version: Version,
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.registry.held.lock();
        if let Some(count) = held.get_mut(&self.version.get()) {
            *count -= 1;
            if *count == 0 {
                held.remove(&self.version.get());
            }
        }
    }
}

/// Counters describing executor activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Version of the last commit.
    pub committed_version: Version,
    /// Batches currently running.
    pub active_batches: usize,
    /// Batches that committed writes.
    pub commits: u64,
    /// Batches rejected by commit validation.
    pub conflicts: u64,
}

/// Transactional storage: the only way to read or change persisted state.
///
/// Every read and write happens inside a batch. A batch observes the last
/// committed state as of its start plus its own writes, and its writes become
/// visible all at once when the unit of work returns `Ok`, or not at all.
///
/// Batches run in parallel. Only the commit step is serialized; at commit a
/// batch is validated against the batches that committed since it started
/// and aborts with [`Error::ConflictAborted`] if one of them touched what it
/// read or wrote.
///
/// # Example
///
/// ```
/// use folio::TransactionalStorage;
///
/// let storage = TransactionalStorage::in_memory(Default::default()).unwrap();
///
/// let key = storage
///     .batch(|accessor| accessor.pages().add_page(b"hello"))
///     .unwrap();
///
/// let mut buf = [0u8; 16];
/// let n = storage
///     .batch(|accessor| accessor.pages().read_page(key, &mut buf))
///     .unwrap();
/// assert_eq!(&buf[..n], b"hello");
/// ```
pub struct TransactionalStorage<S: MvccStore = RocksMvccStore> {
    store: Arc<S>,
    config: StorageConfig,
    /// Version of the last commit. Only advanced while the commit log is locked.
    committed: AtomicU64,
    /// Doubles as the commit lock.
    commit_log: Mutex<CommitLog>,
    snapshots: SnapshotRegistry,
    next_batch_id: AtomicU64,
    page_ids: IdAllocator,
    page_cache: PageCache,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl TransactionalStorage<RocksMvccStore> {
    /// Opens (or creates) a RocksDB-backed storage at `path`.
    pub fn open_path(path: &Path, config: StorageConfig) -> Result<Self, Error> {
        let store = RocksMvccStore::open_with_durability(path, config.durability)?;
        Self::open(Arc::new(store), config)
    }
}

impl TransactionalStorage<MemoryMvccStore> {
    /// Creates an empty storage held in memory.
    pub fn in_memory(config: StorageConfig) -> Result<Self, Error> {
        Self::open(Arc::new(MemoryMvccStore::new()), config)
    }
}

impl<S: MvccStore> TransactionalStorage<S> {
    /// Opens storage over an engine, resuming from its last committed version.
    pub fn open(store: Arc<S>, config: StorageConfig) -> Result<Self, Error> {
        config.validate()?;

        let committed = match store.read(&layout::committed_version(), Version::LATEST)? {
            Some(value) => layout::decode::<u64>(&value)?,
            None => 0,
        };

        info!(
            committed,
            max_page_size = config.max_page_size,
            page_cache_capacity = config.page_cache_capacity,
            "Opened transactional storage"
        );

        Ok(Self {
            page_ids: IdAllocator::new("page", config.id_block_size),
            page_cache: PageCache::new(config.page_cache_capacity),
            store,
            config,
            committed: AtomicU64::new(committed),
            commit_log: Mutex::new(CommitLog::new()),
            snapshots: SnapshotRegistry::default(),
            next_batch_id: AtomicU64::new(1),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        })
    }

    /// Runs `work` as one atomic, serializable batch.
    ///
    /// The error returned by `work` propagates unchanged and discards every
    /// write of the batch; so does a panic inside `work`. Batches are not
    /// retried; see [`Error::is_retryable`].
    ///
    /// # Panics
    ///
    /// Panics if called from inside another batch on the same thread.
    #[instrument(skip_all)]
    pub fn batch<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut StorageAccessor<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        self.run(&CancellationToken::none(), work)
    }

    /// Like [`batch`](Self::batch), but fails with [`Error::Cancelled`] and
    /// commits nothing once `token` is cancelled.
    ///
    /// The token is checked by every accessor operation and once more
    /// immediately before commit.
    #[instrument(skip_all)]
    pub fn batch_with_cancellation<T, E, F>(
        &self,
        token: &CancellationToken,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut StorageAccessor<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        self.run(token, work)
    }

    fn run<T, E, F>(&self, token: &CancellationToken, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut StorageAccessor<'_, S>) -> Result<T, E>,
        E: From<Error>,
    {
        let _reentry = ReentryGuard::enter();
        token.check()?;

        let snapshot = self.begin();
        let id = BatchId(self.next_batch_id.fetch_add(1, Ordering::Relaxed));
        let mut accessor = StorageAccessor::new(self, Transaction::new(id, snapshot.version), token);

        let value = match work(&mut accessor) {
            Ok(value) => value,
            Err(err) => {
                debug!(batch = %id, "Batch aborted by its unit of work");
                return Err(err);
            }
        };

        if token.is_cancelled() {
            warn!(batch = %id, "Batch cancelled before commit");
            return Err(Error::Cancelled.into());
        }

        self.commit(accessor.into_transaction())?;
        Ok(value)
    }

    /// Pins the last committed version for a new batch.
    fn begin(&self) -> SnapshotGuard<'_> {
        let mut held = self.snapshots.held.lock();
        let version = Version(self.committed.load(Ordering::Acquire));
        *held.entry(version.get()).or_insert(0) += 1;

        SnapshotGuard {
            registry: &self.snapshots,
            version,
        }
    }

    fn commit(&self, txn: Transaction) -> Result<Option<Version>, Error> {
        if txn.is_read_only() {
            return Ok(None);
        }

        let mut log = self.commit_log.lock();

        if let Some(key) = log.find_conflict(&txn) {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            warn!(batch = %txn.id, snapshot = txn.snapshot.get(), ?key, "Batch aborted by conflict");
            return Err(Error::ConflictAborted { key });
        }

        let writes = txn.write_count();
        let version = self.apply(&mut log, txn.write_set)?;
        self.commits.fetch_add(1, Ordering::Relaxed);

        for page in txn.deleted_pages {
            self.page_cache.evict(page);
        }

        debug!(batch = %txn.id, version = version.get(), writes, "Batch committed");
        Ok(Some(version))
    }

    /// Writes `writes` at the next version, publishes it and prunes the
    /// commit log down to the oldest snapshot still in use.
    ///
    /// The caller holds the commit lock.
    fn apply(
        &self,
        log: &mut CommitLog,
        writes: BTreeMap<Key, Option<Value>>,
    ) -> Result<Version, Error> {
        let version = Version(self.committed.load(Ordering::Acquire)).next();

        let mut entries = Vec::with_capacity(writes.len() + 1);
        let mut keys = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            keys.push(key.clone());
            entries.push(match value {
                Some(value) => MvccEntry::new(key, value, version),
                None => MvccEntry::tombstone(key, version),
            });
        }
        entries.push(MvccEntry::new(
            layout::committed_version(),
            layout::encode(&version.get())?,
            version,
        ));

        self.store.batch_write(entries)?;
        log.append(version, keys);
        self.committed.store(version.get(), Ordering::Release);

        let floor = self.snapshots.oldest().map_or(version, |oldest| oldest.min(version));
        log.prune(floor);

        Ok(version)
    }

    /// Advances the identifier bound at `key` by `count` in a commit of its
    /// own and returns the previous bound.
    fn reserve_ids(&self, key: &Key, count: u64) -> Result<u64, Error> {
        let mut log = self.commit_log.lock();
        let current = Version(self.committed.load(Ordering::Acquire));

        let start = match self.store.read(key, current)? {
            Some(value) => layout::decode::<u64>(&value)?,
            None => 1,
        };
        let end = start.checked_add(count).ok_or_else(|| {
            StorageError::Corruption(format!("identifier space exhausted at {start}"))
        })?;

        let mut writes = BTreeMap::new();
        writes.insert(key.clone(), Some(layout::encode(&end)?));
        let version = self.apply(&mut log, writes)?;

        debug!(?key, start, end, version = version.get(), "Reserved identifier block");
        Ok(start)
    }

    pub(crate) fn next_page_id(&self) -> Result<u64, Error> {
        self.page_ids.next(|key, count| self.reserve_ids(key, count))
    }

    /// Removes versions no running batch can observe any more.
    ///
    /// For every key, the newest version at or below the oldest snapshot in
    /// use survives, unless it is a delete.
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<GcStats, Error> {
        let committed = self.committed_version();
        let safe = self
            .snapshots
            .oldest()
            .map_or(committed, |oldest| oldest.min(committed));

        let stats = self.store.gc(safe)?;
        info!(
            safe = safe.get(),
            scanned = stats.versions_scanned,
            deleted = stats.versions_deleted,
            "Compaction finished"
        );
        Ok(stats)
    }

    /// Returns executor counters.
    pub fn stats(&self) -> BatchStats {
        BatchStats {
            committed_version: self.committed_version(),
            active_batches: self.snapshots.active(),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }

    /// Version of the last commit.
    #[inline]
    pub fn committed_version(&self) -> Version {
        Version(self.committed.load(Ordering::Acquire))
    }

    /// The configuration this storage was opened with.
    #[inline]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The underlying engine.
    #[inline]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[inline]
    pub(crate) fn page_cache(&self) -> &PageCache {
        &self.page_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CancellationSource;
    use crate::storage::Value;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn memory() -> TransactionalStorage<MemoryMvccStore> {
        TransactionalStorage::in_memory(StorageConfig::default()).unwrap()
    }

    fn put(storage: &TransactionalStorage<MemoryMvccStore>, key: &str, value: &str) {
        storage
            .batch(|a| a.put(Key::from(key), Value::from(value)))
            .unwrap();
    }

    fn get(storage: &TransactionalStorage<MemoryMvccStore>, key: &str) -> Option<Value> {
        storage.batch(|a| a.get(&Key::from(key))).unwrap()
    }

    #[test]
    fn test_commit_is_visible_to_later_batches() {
        let storage = memory();
        put(&storage, "key", "value");

        assert_eq!(get(&storage, "key"), Some(Value::from("value")));
        assert_eq!(storage.stats().commits, 1);
        assert_eq!(storage.stats().active_batches, 0);
    }

    #[test]
    fn test_error_discards_all_writes() {
        let storage = memory();
        put(&storage, "a", "original");
        let before = storage.committed_version();

        let result: Result<(), Error> = storage.batch(|a| {
            a.put(Key::from("a"), Value::from("changed"))?;
            a.put(Key::from("b"), Value::from("new"))?;
            Err(Error::InvalidArgument("boom".to_string()))
        });

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(get(&storage, "a"), Some(Value::from("original")));
        assert_eq!(get(&storage, "b"), None);
        assert_eq!(storage.committed_version(), before);
    }

    #[derive(Debug)]
    enum AppError {
        Storage(Error),
        Rejected,
    }

    impl From<Error> for AppError {
        fn from(err: Error) -> Self {
            AppError::Storage(err)
        }
    }

    #[test]
    fn test_caller_error_type_propagates() {
        let storage = memory();

        let result: Result<(), AppError> = storage.batch(|a| {
            a.put(Key::from("k"), Value::from("v"))?;
            Err(AppError::Rejected)
        });

        assert!(matches!(result, Err(AppError::Rejected)));
        assert_eq!(get(&storage, "k"), None);
    }

    #[test]
    fn test_panic_discards_writes() {
        let storage = memory();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), Error> = storage.batch(|a| {
                a.put(Key::from("k"), Value::from("v"))?;
                panic!("unit of work failed");
            });
        }));

        assert!(result.is_err());
        assert_eq!(storage.stats().active_batches, 0);
        // The thread is usable for batches again.
        assert_eq!(get(&storage, "k"), None);
    }

    #[test]
    #[should_panic(expected = "nested batch")]
    fn test_nested_batch_panics() {
        let storage = memory();
        let _: Result<(), Error> = storage.batch(|_| {
            let _: Result<(), Error> = storage.batch(|_| Ok(()));
            Ok(())
        });
    }

    #[test]
    fn test_snapshot_ignores_later_commits() {
        let storage = Arc::new(memory());
        put(&storage, "k", "v1");

        let reader_started = Arc::new(Barrier::new(2));
        let writer_done = Arc::new(Barrier::new(2));

        let writer = {
            let storage = Arc::clone(&storage);
            let reader_started = Arc::clone(&reader_started);
            let writer_done = Arc::clone(&writer_done);
            thread::spawn(move || {
                reader_started.wait();
                put(&storage, "k", "v2");
                writer_done.wait();
            })
        };

        let (first, second) = storage
            .batch(|a| {
                let first = a.get(&Key::from("k"))?;
                reader_started.wait();
                writer_done.wait();
                let second = a.get(&Key::from("k"))?;
                Ok::<_, Error>((first, second))
            })
            .unwrap();
        writer.join().unwrap();

        assert_eq!(first, Some(Value::from("v1")));
        assert_eq!(second, Some(Value::from("v1")));
        assert_eq!(get(&storage, "k"), Some(Value::from("v2")));
    }

    #[test]
    fn test_conflicting_batches_one_aborts() {
        let storage = Arc::new(memory());
        put(&storage, "counter", "0");

        let both_read = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let storage = Arc::clone(&storage);
                let both_read = Arc::clone(&both_read);
                thread::spawn(move || {
                    storage.batch(|a| {
                        a.get(&Key::from("counter"))?;
                        both_read.wait();
                        a.put(Key::from("counter"), Value::from(format!("{i}").as_str()))
                    })
                })
            })
            .collect();

        let results: Vec<Result<(), Error>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let committed = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(Error::ConflictAborted { key }) if key == &Key::from("counter")))
            .count();
        assert_eq!(committed, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(storage.stats().conflicts, 1);
    }

    #[test]
    fn test_disjoint_batches_both_commit() {
        let storage = Arc::new(memory());
        let both_started = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|key| {
                let storage = Arc::clone(&storage);
                let both_started = Arc::clone(&both_started);
                thread::spawn(move || {
                    storage.batch(|a| {
                        both_started.wait();
                        a.put(Key::from(key), Value::from("v"))
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(get(&storage, "left"), Some(Value::from("v")));
        assert_eq!(get(&storage, "right"), Some(Value::from("v")));
    }

    #[test]
    fn test_cancelled_batch_commits_nothing() {
        let storage = memory();
        let source = CancellationSource::new();
        let token = source.token();

        let result: Result<(), Error> = storage.batch_with_cancellation(&token, |a| {
            a.put(Key::from("k"), Value::from("v"))?;
            source.cancel();
            Ok(())
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(get(&storage, "k"), None);

        // Accessor operations observe the token too.
        let result: Result<(), Error> =
            storage.batch_with_cancellation(&token, |a| a.put(Key::from("k"), Value::from("v")));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(storage.stats().commits, 0);
    }

    #[test]
    fn test_read_only_batch_does_not_advance_version() {
        let storage = memory();
        put(&storage, "k", "v");
        let version = storage.committed_version();

        get(&storage, "k");
        get(&storage, "missing");

        assert_eq!(storage.committed_version(), version);
    }

    #[test]
    fn test_compact_keeps_latest_state() {
        let storage = memory();
        for i in 0..5 {
            put(&storage, "k", &format!("v{i}"));
        }
        storage.batch(|a| a.delete(Key::from("gone"))).unwrap();

        let stats = storage.compact().unwrap();

        assert!(stats.versions_deleted > 0);
        assert_eq!(get(&storage, "k"), Some(Value::from("v4")));
        assert_eq!(get(&storage, "gone"), None);
    }

    #[test]
    fn test_page_ids_are_unique_across_restart() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::default().with_id_block_size(4);

        let first: Vec<u64> = {
            let storage = TransactionalStorage::open_path(dir.path(), config.clone()).unwrap();
            (0..3).map(|_| storage.next_page_id().unwrap()).collect()
        };

        let storage = TransactionalStorage::open_path(dir.path(), config).unwrap();
        let second = storage.next_page_id().unwrap();

        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, 5);
    }

    #[test]
    fn test_id_reservations_do_not_grow_commit_log() {
        let storage =
            TransactionalStorage::in_memory(StorageConfig::default().with_id_block_size(1))
                .unwrap();

        for i in 0..10u8 {
            let result: Result<(), Error> = storage.batch(|a| {
                a.pages().add_page(&[i])?;
                Err(Error::InvalidArgument("abandoned".to_string()))
            });
            assert!(result.is_err());
        }

        assert_eq!(storage.stats().commits, 0);
        assert!(storage.commit_log.lock().len() <= 1);
    }

    #[test]
    fn test_committed_version_survives_reopen() {
        let dir = TempDir::new().unwrap();

        let version = {
            let storage =
                TransactionalStorage::open_path(dir.path(), StorageConfig::default()).unwrap();
            storage
                .batch(|a| a.put(Key::from("k"), Value::from("v")))
                .unwrap();
            storage.committed_version()
        };

        let storage =
            TransactionalStorage::open_path(dir.path(), StorageConfig::default()).unwrap();
        assert_eq!(storage.committed_version(), version);
        assert_eq!(
            storage.batch(|a| a.get(&Key::from("k"))).unwrap(),
            Some(Value::from("v"))
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result =
            TransactionalStorage::in_memory(StorageConfig::default().with_pages_batch_size(0));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
