// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! RocksDB-backed MVCC storage implementation.

use std::path::Path;

use rocksdb::{
    DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch, WriteOptions,
};
use tracing::info;

use super::{
    decode_value, encode_mvcc_key, encode_value, plan_gc, resolve_scan,
    user_key_prefix, GcStats, Key, MvccEntry, MvccStore, StorageError, Value, Version,
    MAX_KEY_SIZE, MAX_VALUE_SIZE,
};

/// Deletions per write batch during garbage collection.
const GC_CHUNK_SIZE: usize = 1000;

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Writes are synced to WAL but not fsynced to disk.
    /// Durable against process crashes but not power failures.
    /// This is the default mode, balancing performance and safety.
    #[default]
    WalOnly,
    /// Writes are fsynced to disk on every operation.
    /// Durable against power failures but slower.
    FsyncEveryWrite,
}

/// RocksDB-backed MVCC storage.
///
/// Versions are ordered newest-first within each user key.
pub struct RocksMvccStore {
    db: DBWithThreadMode<MultiThreaded>,
    write_opts: WriteOptions,
}

impl RocksMvccStore {
    /// Opens or creates a RocksDB database at the given path.
    ///
    /// Uses `DurabilityMode::WalOnly` by default (fast, durable against process crash).
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_durability(path, DurabilityMode::default())
    }

    /// Opens or creates a RocksDB database with specified durability mode.
    pub fn open_with_durability(
        path: &Path,
        durability: DurabilityMode,
    ) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Pages dominate the write volume; size memtables for 64KB values.
        opts.set_write_buffer_size(64 * 1024 * 1024); // 64MB
        opts.set_max_write_buffer_number(4);
        opts.set_target_file_size_base(64 * 1024 * 1024);
        opts.set_level_compaction_dynamic_level_bytes(true);

        // Enable bloom filters for point lookups
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        Self::open_with_options(path, opts, durability)
    }

    /// Opens a database with custom RocksDB options.
    pub fn open_with_options(
        path: &Path,
        opts: Options,
        durability: DurabilityMode,
    ) -> Result<Self, StorageError> {
        let db = DBWithThreadMode::open(&opts, path)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(durability == DurabilityMode::FsyncEveryWrite);

        info!(path = %path.display(), ?durability, "Opened RocksDB store");

        Ok(Self { db, write_opts })
    }

    /// Forces a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Validates key size.
    fn validate_key(&self, key: &Key) -> Result<(), StorageError> {
        if key.len() > MAX_KEY_SIZE {
            return Err(StorageError::KeyTooLarge {
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(())
    }

    /// Validates value size.
    fn validate_value(&self, value: &Value) -> Result<(), StorageError> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        Ok(())
    }

    /// Forward iterator over encoded entries starting at `from`.
    fn entries_from(
        &self,
        from: &[u8],
    ) -> impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), StorageError>> + '_ {
        self.db
            .iterator(IteratorMode::From(from, Direction::Forward))
            .map(|item| item.map_err(StorageError::from))
    }
}

impl MvccStore for RocksMvccStore {
    fn read(&self, key: &Key, version: Version) -> Result<Option<Value>, StorageError> {
        self.validate_key(key)?;

        let prefix = user_key_prefix(key);

        // Newer versions sort first, so the seek lands on the newest entry at or
        // below `version`.
        let Some(item) = self.entries_from(&encode_mvcc_key(key, version)).next() else {
            return Ok(None);
        };
        let (encoded_key, stored) = item?;

        // The terminator makes the prefix unique to this user key
        if !encoded_key.starts_with(&prefix) {
            return Ok(None);
        }

        decode_value(&stored)
    }

    fn scan(
        &self,
        start: &Key,
        end: &Key,
        version: Version,
        limit: usize,
    ) -> Result<Vec<(Key, Value)>, StorageError> {
        self.validate_key(start)?;
        self.validate_key(end)?;

        let start_encoded = user_key_prefix(start);
        resolve_scan(self.entries_from(&start_encoded), end, version, limit)
    }

    fn batch_write(&self, entries: Vec<MvccEntry>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();

        for entry in entries {
            self.validate_key(&entry.key)?;
            if let Some(ref value) = entry.value {
                self.validate_value(value)?;
            }

            let encoded_key = encode_mvcc_key(&entry.key, entry.version);
            batch.put(&encoded_key, encode_value(entry.value.as_ref()));
        }

        self.db.write_opt(batch, &self.write_opts)?;
        Ok(())
    }

    fn gc(&self, safe: Version) -> Result<GcStats, StorageError> {
        let iter = self
            .db
            .iterator(IteratorMode::Start)
            .map(|item| item.map_err(StorageError::from));
        let (to_delete, stats) = plan_gc(iter, safe)?;

        // Chunks apply in plan order, tombstones after what they shadow
        for chunk in to_delete.chunks(GC_CHUNK_SIZE) {
            let mut batch = WriteBatch::default();
            for key in chunk {
                batch.delete(key);
            }
            self.db.write_opt(batch, &self.write_opts)?;
        }

        Ok(stats)
    }
}
