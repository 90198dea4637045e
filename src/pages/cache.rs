// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Read-through cache of committed page content.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

const MAX_SHARDS: usize = 16;

/// Sharded LRU cache keyed by page id.
///
/// Holds only content read from the engine, never a batch's uncommitted
/// pages. Page ids are never reused, so an entry can only go stale by its
/// page being deleted; callers check page metadata in their snapshot before
/// consulting the cache.
pub(crate) struct PageCache {
    shards: Vec<Mutex<LruCache<u64, Arc<[u8]>>>>,
}

impl PageCache {
    /// Creates a cache holding about `capacity` pages. Zero disables caching.
    pub(crate) fn new(capacity: usize) -> Self {
        let shard_count = capacity.min(MAX_SHARDS);
        let per_shard = if shard_count == 0 {
            NonZeroUsize::MIN
        } else {
            NonZeroUsize::new(capacity.div_ceil(shard_count)).unwrap_or(NonZeroUsize::MIN)
        };

        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    #[inline]
    fn shard(&self, page: u64) -> Option<&Mutex<LruCache<u64, Arc<[u8]>>>> {
        if self.shards.is_empty() {
            return None;
        }
        self.shards.get(page as usize % self.shards.len())
    }

    pub(crate) fn get(&self, page: u64) -> Option<Arc<[u8]>> {
        self.shard(page)?.lock().get(&page).cloned()
    }

    pub(crate) fn insert(&self, page: u64, content: Arc<[u8]>) {
        if let Some(shard) = self.shard(page) {
            shard.lock().put(page, content);
        }
    }

    pub(crate) fn evict(&self, page: u64) {
        if let Some(shard) = self.shard(page) {
            shard.lock().pop(&page);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_evict() {
        let cache = PageCache::new(8);
        cache.insert(1, Arc::from(&b"one"[..]));
        cache.insert(2, Arc::from(&b"two"[..]));

        assert_eq!(cache.get(1).as_deref(), Some(&b"one"[..]));
        cache.evict(1);
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = PageCache::new(0);
        cache.insert(1, Arc::from(&b"one"[..]));
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = PageCache::new(32);
        for page in 0..1000 {
            cache.insert(page, Arc::from(&[0u8; 4][..]));
        }
        assert!(cache.len() <= 32);
    }
}
