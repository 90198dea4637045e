// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! High/low identifier allocation.
//!
//! Each allocator persists only the upper bound of the blocks it has handed
//! out. A block is reserved by a commit of its own, outside any user batch,
//! so batches never conflict on a counter record. Identifiers of a reserved
//! block are unique for the lifetime of the store even when the batch that
//! drew them aborts, or the process restarts with the block half used.

use std::ops::Range;

use parking_lot::Mutex;

use crate::error::Error;
use crate::layout;
use crate::storage::Key;

pub(crate) struct IdAllocator {
    key: Key,
    block_size: u64,
    available: Mutex<Range<u64>>,
}

impl IdAllocator {
    pub(crate) fn new(name: &str, block_size: u64) -> Self {
        Self {
            key: layout::id_block(name),
            block_size,
            available: Mutex::new(0..0),
        }
    }

    /// Returns the next identifier, reserving a new block through `reserve`
    /// when the current one is used up.
    ///
    /// `reserve(key, n)` must durably advance the bound stored at `key` by `n`
    /// and return its previous value.
    pub(crate) fn next<F>(&self, reserve: F) -> Result<u64, Error>
    where
        F: FnOnce(&Key, u64) -> Result<u64, Error>,
    {
        let mut available = self.available.lock();
        if available.is_empty() {
            let start = reserve(&self.key, self.block_size)?;
            *available = start..start + self.block_size;
        }

        let id = available.start;
        available.start += 1;
        Ok(id)
    }
}
