// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Reduce-key bookkeeping for map/reduce indexes.
//!
//! For every (index, reduce key) pair the registry remembers which reduce
//! strategy was last applied. Keys of one index can be listed in pages: each
//! key gets a sequence number when it is first recorded and keeps it for
//! life, so listing by sequence position stays stable while other keys are
//! updated between pages.
//!
//! Sequence numbers come from a per-index counter read and written inside the
//! inserting batch. Two batches inserting into the same index therefore
//! conflict, and sequence order is commit order: a key committed after a page
//! was listed always lands behind it.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::batch::StorageAccessor;
use crate::error::Error;
use crate::layout;
use crate::storage::{MvccStore, StorageError};

/// Strategy last used to reduce a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReduceType {
    /// Never reduced.
    #[default]
    None,
    SingleStep,
    MultiStep,
}

/// A reduce key of an index and the strategy last applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReduceKeyAndType {
    pub index: String,
    pub reduce_key: String,
    pub reduce_type: ReduceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ReduceKeyRecord {
    sequence: u64,
    reduce_type: ReduceType,
}

/// Reduce-key operations inside a batch. Obtained from
/// [`StorageAccessor::map_reduce`].
pub struct ReduceKeyRegistry<'t, 'a, S: MvccStore> {
    accessor: &'t mut StorageAccessor<'a, S>,
}

impl<'t, 'a, S: MvccStore> ReduceKeyRegistry<'t, 'a, S> {
    pub(crate) fn new(accessor: &'t mut StorageAccessor<'a, S>) -> Self {
        Self { accessor }
    }

    /// Records `reduce_type` as the strategy last applied to `reduce_key`.
    ///
    /// The first call for a key assigns its listing position; later calls
    /// only change the strategy.
    pub fn update_performed_reduce_type(
        &mut self,
        index: &str,
        reduce_key: &str,
        reduce_type: ReduceType,
    ) -> Result<(), Error> {
        let record_key = layout::reduce_record(index, reduce_key);

        let record = match self.accessor.get_record::<ReduceKeyRecord>(&record_key)? {
            Some(existing) if existing.reduce_type == reduce_type => return Ok(()),
            Some(existing) => ReduceKeyRecord {
                sequence: existing.sequence,
                reduce_type,
            },
            None => {
                let next_key = layout::reduce_next_sequence(index);
                let sequence = self.accessor.get_record::<u64>(&next_key)?.unwrap_or(0);
                self.accessor.put_record(next_key, &(sequence + 1))?;
                self.accessor.put_record(
                    layout::reduce_order(index, sequence),
                    &reduce_key.to_string(),
                )?;
                trace!(index, reduce_key, sequence, "Registered reduce key");
                ReduceKeyRecord {
                    sequence,
                    reduce_type,
                }
            }
        };

        self.accessor.put_record(record_key, &record)
    }

    /// Returns the strategy last applied to `reduce_key`, or
    /// [`ReduceType::None`] if none was recorded.
    pub fn get_last_performed_reduce_type(
        &mut self,
        index: &str,
        reduce_key: &str,
    ) -> Result<ReduceType, Error> {
        Ok(self
            .accessor
            .get_record::<ReduceKeyRecord>(&layout::reduce_record(index, reduce_key))?
            .map_or(ReduceType::None, |record| record.reduce_type))
    }

    /// Returns up to `take` keys of `index` in registration order, skipping
    /// the first `start`.
    ///
    /// Consecutive windows `(0, n)`, `(n, n)`, `(2n, n)`, ... list every key
    /// exactly once.
    pub fn get_reduce_keys_and_types(
        &mut self,
        index: &str,
        start: usize,
        take: usize,
    ) -> Result<Vec<ReduceKeyAndType>, Error> {
        let (from, end) = layout::reduce_orders(index);
        let ordered = self
            .accessor
            .scan(&from, &end, start.saturating_add(take))?;

        let mut keys = Vec::with_capacity(ordered.len().saturating_sub(start));
        for (_, value) in ordered.iter().skip(start) {
            let reduce_key: String = layout::decode(value)?;
            let record = self
                .accessor
                .get_record::<ReduceKeyRecord>(&layout::reduce_record(index, &reduce_key))?
                .ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "reduce key {reduce_key} of {index} is listed but has no record"
                    ))
                })?;

            keys.push(ReduceKeyAndType {
                index: index.to_string(),
                reduce_key,
                reduce_type: record.reduce_type,
            });
        }

        Ok(keys)
    }

    /// Returns the number of keys recorded for `index`.
    pub fn count_reduce_keys(&mut self, index: &str) -> Result<usize, Error> {
        let (from, end) = layout::reduce_orders(index);
        Ok(self.accessor.scan(&from, &end, usize::MAX)?.len())
    }
}
