// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-memory MVCC storage implementation.
//!
//! Stores the same encoded keys as [`RocksMvccStore`](super::RocksMvccStore)
//! in an ordered map, so both engines share version resolution and GC.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use super::{
    decode_mvcc_key, decode_value, encode_mvcc_key, encode_value, plan_gc, resolve_scan,
    user_key_prefix, GcStats, Key, MvccEntry, MvccStore, StorageError, Value, Version,
    MAX_KEY_SIZE, MAX_VALUE_SIZE,
};

/// In-memory MVCC storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryMvccStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryMvccStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored versions, tombstones included.
    pub fn version_count(&self) -> usize {
        self.entries.read().len()
    }
}

impl MvccStore for MemoryMvccStore {
    fn read(&self, key: &Key, version: Version) -> Result<Option<Value>, StorageError> {
        let prefix = user_key_prefix(key);
        let entries = self.entries.read();

        let from = (Bound::Included(prefix.as_slice()), Bound::Unbounded);

        for (encoded_key, stored) in entries.range::<[u8], _>(from) {
            if !encoded_key.starts_with(&prefix) {
                break;
            }

            let (_, entry_version) = decode_mvcc_key(encoded_key)?;
            if entry_version > version {
                continue;
            }

            return decode_value(stored);
        }

        Ok(None)
    }

    fn scan(
        &self,
        start: &Key,
        end: &Key,
        version: Version,
        limit: usize,
    ) -> Result<Vec<(Key, Value)>, StorageError> {
        let start_encoded = user_key_prefix(start);
        let entries = self.entries.read();

        let iter = entries
            .range::<[u8], _>((Bound::Included(start_encoded.as_slice()), Bound::Unbounded))
            .map(|(k, v)| Ok((k.as_slice(), v.as_slice())));
        resolve_scan(iter, end, version, limit)
    }

    fn batch_write(&self, entries: Vec<MvccEntry>) -> Result<(), StorageError> {
        let mut encoded = Vec::with_capacity(entries.len());

        // Validate everything before touching the map so the batch stays atomic
        for entry in entries {
            if entry.key.len() > MAX_KEY_SIZE {
                return Err(StorageError::KeyTooLarge {
                    size: entry.key.len(),
                    max: MAX_KEY_SIZE,
                });
            }
            if let Some(ref value) = entry.value {
                if value.len() > MAX_VALUE_SIZE {
                    return Err(StorageError::ValueTooLarge {
                        size: value.len(),
                        max: MAX_VALUE_SIZE,
                    });
                }
            }

            encoded.push((
                encode_mvcc_key(&entry.key, entry.version),
                encode_value(entry.value.as_ref()),
            ));
        }

        self.entries.write().extend(encoded);
        Ok(())
    }

    fn gc(&self, safe: Version) -> Result<GcStats, StorageError> {
        let mut entries = self.entries.write();

        let iter = entries
            .iter()
            .map(|(k, v)| Ok((k.as_slice(), v.as_slice())));
        let (to_delete, stats) = plan_gc(iter, safe)?;

        for key in to_delete {
            entries.remove(&key);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(store: &MemoryMvccStore, key: &str, value: Option<&str>, version: u64) {
        let entry = match value {
            Some(value) => MvccEntry::new(Key::from(key), Value::from(value), Version(version)),
            None => MvccEntry::tombstone(Key::from(key), Version(version)),
        };
        store.batch_write(vec![entry]).unwrap();
    }

    #[test]
    fn test_read_versions() {
        let store = MemoryMvccStore::new();
        let key = Key::from("key");

        write(&store, "key", Some("v1"), 1);
        write(&store, "key", Some("v2"), 3);

        assert_eq!(store.read(&key, Version(0)).unwrap(), None);
        assert_eq!(store.read(&key, Version(2)).unwrap(), Some(Value::from("v1")));
        assert_eq!(store.read(&key, Version(3)).unwrap(), Some(Value::from("v2")));
    }

    #[test]
    fn test_scan_respects_range_and_tombstones() {
        let store = MemoryMvccStore::new();

        write(&store, "a", Some("1"), 1);
        write(&store, "b", Some("2"), 1);
        write(&store, "b", None, 2);
        write(&store, "c", Some("3"), 1);
        write(&store, "d", Some("4"), 1);

        let rows = store
            .scan(&Key::from("a"), &Key::from("d"), Version(2), 10)
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (Key::from("a"), Value::from("1")),
                (Key::from("c"), Value::from("3")),
            ]
        );

        let before_delete = store
            .scan(&Key::from("a"), &Key::from("d"), Version(1), 10)
            .unwrap();
        assert_eq!(before_delete.len(), 3);
    }

    #[test]
    fn test_rejected_batch_writes_nothing() {
        let store = MemoryMvccStore::new();

        let result = store.batch_write(vec![
            MvccEntry::new(Key::from("ok"), Value::from("v"), Version(1)),
            MvccEntry::new(Key::new(vec![1u8; MAX_KEY_SIZE + 1]), Value::from("v"), Version(1)),
        ]);

        assert!(matches!(result, Err(StorageError::KeyTooLarge { .. })));
        assert_eq!(store.version_count(), 0);
    }

    #[test]
    fn test_gc() {
        let store = MemoryMvccStore::new();

        write(&store, "a", Some("1"), 1);
        write(&store, "a", Some("2"), 2);
        write(&store, "b", Some("1"), 1);
        write(&store, "b", None, 2);

        let stats = store.gc(Version(2)).unwrap();

        assert_eq!(stats.versions_scanned, 4);
        assert_eq!(stats.versions_deleted, 3);
        assert_eq!(store.version_count(), 1);
        assert_eq!(
            store.read(&Key::from("a"), Version::LATEST).unwrap(),
            Some(Value::from("2"))
        );
    }
}
