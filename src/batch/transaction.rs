// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-batch transaction state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::storage::{Key, Value, Version};

/// Unique batch identifier, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// The private view of one running batch.
///
/// Reads are tracked for commit validation. Writes are buffered here and
/// reach the store only when the batch commits.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub(crate) id: BatchId,
    /// Last committed version when the batch began.
    pub(crate) snapshot: Version,
    /// Keys read through point lookups.
    pub(crate) read_set: BTreeSet<Key>,
    /// Half-open key ranges read through scans.
    pub(crate) read_ranges: Vec<(Key, Key)>,
    /// Buffered writes; `None` is a delete.
    pub(crate) write_set: BTreeMap<Key, Option<Value>>,
    /// Pages removed by this batch, evicted from the page cache on commit.
    pub(crate) deleted_pages: Vec<u64>,
}

impl Transaction {
    pub(crate) fn new(id: BatchId, snapshot: Version) -> Self {
        Self {
            id,
            snapshot,
            read_set: BTreeSet::new(),
            read_ranges: Vec::new(),
            write_set: BTreeMap::new(),
            deleted_pages: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Returns the buffered write for `key`, if any.
    ///
    /// The outer `Option` says whether the key is buffered, the inner one
    /// whether the buffered write is a value or a delete.
    #[inline]
    pub(crate) fn buffered(&self, key: &Key) -> Option<Option<&Value>> {
        self.write_set.get(key).map(Option::as_ref)
    }

    pub(crate) fn record_read(&mut self, key: &Key) {
        if !self.write_set.contains_key(key) {
            self.read_set.insert(key.clone());
        }
    }

    pub(crate) fn record_range(&mut self, start: &Key, end: &Key) {
        self.read_ranges.push((start.clone(), end.clone()));
    }

    pub(crate) fn put(&mut self, key: Key, value: Value) {
        self.write_set.insert(key, Some(value));
    }

    pub(crate) fn delete(&mut self, key: Key) {
        self.write_set.insert(key, None);
    }

    /// Buffered writes within `[start, end)`, in key order.
    pub(crate) fn pending_in<'a>(
        &'a self,
        start: &Key,
        end: &'a Key,
    ) -> impl Iterator<Item = (&'a Key, &'a Option<Value>)> + 'a {
        self.write_set
            .range(start.clone()..)
            .take_while(move |(k, _)| *k < end)
    }

    #[inline]
    pub(crate) fn write_count(&self) -> usize {
        self.write_set.len()
    }

    #[inline]
    pub(crate) fn read_count(&self) -> usize {
        self.read_set.len() + self.read_ranges.len()
    }
}
