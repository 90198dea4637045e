// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for transactional storage.

use crate::error::Error;
use crate::storage::DurabilityMode;

/// Maximum page size of the reference layout (64 KiB).
pub const DEFAULT_MAX_PAGE_SIZE: usize = 64 * 1024;

/// Number of page descriptors a stream fetches per frame.
pub const DEFAULT_PAGES_BATCH_SIZE: usize = 64;

/// Configuration for [`TransactionalStorage`](crate::TransactionalStorage).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Largest page `add_page` accepts, in bytes.
    pub max_page_size: usize,
    /// Page descriptors per stream frame.
    pub pages_batch_size: usize,
    /// Committed pages kept in the read-through cache (0 disables it).
    pub page_cache_capacity: usize,
    /// Identifiers reserved per persisted allocator step.
    pub id_block_size: u64,
    /// Durability of the RocksDB engine opened by
    /// [`TransactionalStorage::open_path`](crate::TransactionalStorage::open_path).
    pub durability: DurabilityMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            pages_batch_size: DEFAULT_PAGES_BATCH_SIZE,
            page_cache_capacity: 1024,
            id_block_size: 1024,
            durability: DurabilityMode::default(),
        }
    }
}

impl StorageConfig {
    /// Sets the maximum page size.
    pub fn with_max_page_size(mut self, bytes: usize) -> Self {
        self.max_page_size = bytes;
        self
    }

    /// Sets the number of page descriptors per stream frame.
    pub fn with_pages_batch_size(mut self, pages: usize) -> Self {
        self.pages_batch_size = pages;
        self
    }

    /// Sets the page cache capacity.
    pub fn with_page_cache_capacity(mut self, pages: usize) -> Self {
        self.page_cache_capacity = pages;
        self
    }

    /// Sets the identifier block size.
    pub fn with_id_block_size(mut self, ids: u64) -> Self {
        self.id_block_size = ids;
        self
    }

    /// Sets the RocksDB durability mode.
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_page_size == 0 || self.max_page_size > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "max_page_size must be in 1..={}, got {}",
                u32::MAX,
                self.max_page_size
            )));
        }
        if self.pages_batch_size == 0 {
            return Err(Error::InvalidArgument(
                "pages_batch_size must be positive".to_string(),
            ));
        }
        if self.id_block_size == 0 {
            return Err(Error::InvalidArgument(
                "id_block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
