// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Commit-time conflict detection.
//!
//! Batches validate backwards: at commit, a batch is checked against the
//! write sets of every batch that committed after its snapshot. If any of
//! those wrote a key the batch read, scanned over, or itself wrote, the batch
//! aborts. A batch that passes is serializable at its commit version.

use std::collections::VecDeque;

use crate::storage::{Key, Version};

use super::transaction::Transaction;

/// Write set of one committed batch.
#[derive(Debug)]
struct CommitRecord {
    version: Version,
    /// Sorted.
    writes: Vec<Key>,
}

/// Recent commits, oldest first.
///
/// The log is pruned up to the oldest snapshot still held by a running batch;
/// nothing below that can ever be validated against again.
#[derive(Debug, Default)]
pub(crate) struct CommitLog {
    records: VecDeque<CommitRecord>,
}

impl CommitLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records the write set of the batch committed at `version`.
    pub(crate) fn append(&mut self, version: Version, mut writes: Vec<Key>) {
        debug_assert!(self
            .records
            .back()
            .map_or(true, |last| last.version < version));
        writes.sort_unstable();
        self.records.push_back(CommitRecord { version, writes });
    }

    /// Returns the first key that makes `txn` non-serializable, if any.
    pub(crate) fn find_conflict(&self, txn: &Transaction) -> Option<Key> {
        let start = self
            .records
            .partition_point(|record| record.version <= txn.snapshot);

        self.records
            .range(start..)
            .flat_map(|record| record.writes.iter())
            .find(|key| conflicts_with(txn, key))
            .cloned()
    }

    /// Drops every record at or below `floor`.
    pub(crate) fn prune(&mut self, floor: Version) {
        while self
            .records
            .front()
            .map_or(false, |record| record.version <= floor)
        {
            self.records.pop_front();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

fn conflicts_with(txn: &Transaction, key: &Key) -> bool {
    txn.read_set.contains(key)
        || txn.write_set.contains_key(key)
        || txn
            .read_ranges
            .iter()
            .any(|(start, end)| key.within(start, end))
}
