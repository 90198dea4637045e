// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The handle a unit of work uses to reach storage.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::files::FileCatalog;
use crate::layout;
use crate::map_reduce::ReduceKeyRegistry;
use crate::pages::PageStore;
use crate::storage::{Key, MvccStore, Value, Version};

use super::cancel::CancellationToken;
use super::executor::TransactionalStorage;
use super::transaction::{BatchId, Transaction};

/// Access to storage inside one batch.
///
/// Handed to the unit of work by
/// [`TransactionalStorage::batch`](crate::TransactionalStorage::batch). All
/// reads go to the batch snapshot overlaid with the batch's own writes; all
/// writes are buffered until the batch commits.
pub struct StorageAccessor<'a, S: MvccStore> {
    storage: &'a TransactionalStorage<S>,
    txn: Transaction,
    token: &'a CancellationToken,
}

impl<'a, S: MvccStore> StorageAccessor<'a, S> {
    pub(crate) fn new(
        storage: &'a TransactionalStorage<S>,
        txn: Transaction,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            storage,
            txn,
            token,
        }
    }

    /// Identifier of the running batch.
    #[inline]
    pub fn batch_id(&self) -> BatchId {
        self.txn.id
    }

    /// The committed version this batch reads from.
    #[inline]
    pub fn snapshot(&self) -> Version {
        self.txn.snapshot
    }

    /// Page content storage.
    pub fn pages(&mut self) -> PageStore<'_, 'a, S> {
        PageStore::new(self)
    }

    /// File headers and page mappings.
    pub fn files(&mut self) -> FileCatalog<'_, 'a, S> {
        FileCatalog::new(self)
    }

    /// Reduce-key bookkeeping for map/reduce indexes.
    pub fn map_reduce(&mut self) -> ReduceKeyRegistry<'_, 'a, S> {
        ReduceKeyRegistry::new(self)
    }

    pub(crate) fn storage(&self) -> &'a TransactionalStorage<S> {
        self.storage
    }

    pub(crate) fn get(&mut self, key: &Key) -> Result<Option<Value>, Error> {
        self.token.check()?;

        if let Some(buffered) = self.txn.buffered(key) {
            return Ok(buffered.cloned());
        }

        let value = self.storage.store().read(key, self.txn.snapshot)?;
        self.txn.record_read(key);
        Ok(value)
    }

    pub(crate) fn get_record<T: DeserializeOwned>(&mut self, key: &Key) -> Result<Option<T>, Error> {
        match self.get(key)? {
            Some(value) => Ok(Some(layout::decode(&value)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put(&mut self, key: Key, value: Value) -> Result<(), Error> {
        self.token.check()?;
        self.txn.put(key, value);
        Ok(())
    }

    pub(crate) fn put_record<T: Serialize>(&mut self, key: Key, record: &T) -> Result<(), Error> {
        let value = layout::encode(record)?;
        self.put(key, value)
    }

    pub(crate) fn delete(&mut self, key: Key) -> Result<(), Error> {
        self.token.check()?;
        self.txn.delete(key);
        Ok(())
    }

    /// Returns up to `limit` live entries in `[start, end)`, in key order.
    pub(crate) fn scan(
        &mut self,
        start: &Key,
        end: &Key,
        limit: usize,
    ) -> Result<Vec<(Key, Value)>, Error> {
        self.token.check()?;
        if limit == 0 || start >= end {
            return Ok(Vec::new());
        }

        // Each buffered delete can hide at most one stored row, so `limit`
        // plus the number of buffered keys in range is always enough.
        let pending = self.txn.pending_in(start, end).count();
        let rows = self.storage.store().scan(
            start,
            end,
            self.txn.snapshot,
            limit.saturating_add(pending),
        )?;
        self.txn.record_range(start, end);

        if pending == 0 {
            let mut rows = rows;
            rows.truncate(limit);
            return Ok(rows);
        }

        let mut merged: BTreeMap<Key, Value> = rows.into_iter().collect();
        for (key, write) in self.txn.pending_in(start, end) {
            match write {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().take(limit).collect())
    }

    /// Returns true if this batch has written or deleted `key`.
    #[inline]
    pub(crate) fn is_buffered(&self, key: &Key) -> bool {
        self.txn.buffered(key).is_some()
    }

    pub(crate) fn mark_page_deleted(&mut self, page: u64) {
        self.txn.deleted_pages.push(page);
    }

    pub(crate) fn into_transaction(self) -> Transaction {
        self.txn
    }
}
