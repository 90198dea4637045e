// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Page-addressed blob storage.
//!
//! A page is an immutable block of at most
//! [`max_page_size`](crate::StorageConfig::max_page_size) bytes. Pages are
//! written once, addressed by a [`PageKey`] that is never reused, and
//! indexed by the SHA-256 of their content so identical content is stored
//! once. The file catalog counts references to each page; a page disappears
//! when its last reference is released.

mod cache;

pub(crate) use cache::PageCache;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::batch::StorageAccessor;
use crate::error::Error;
use crate::layout;
use crate::storage::{MvccStore, StorageError, Value};

/// Opaque, stable identifier of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageKey(pub u64);

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page/{}", self.0)
    }
}

/// Persisted bookkeeping for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PageMeta {
    pub(crate) size: u32,
    pub(crate) hash: [u8; 32],
    pub(crate) references: u32,
}

/// Page operations inside a batch. Obtained from
/// [`StorageAccessor::pages`].
pub struct PageStore<'t, 'a, S: MvccStore> {
    accessor: &'t mut StorageAccessor<'a, S>,
}

impl<'t, 'a, S: MvccStore> PageStore<'t, 'a, S> {
    pub(crate) fn new(accessor: &'t mut StorageAccessor<'a, S>) -> Self {
        Self { accessor }
    }

    /// Stores `content` as a page and returns its key.
    ///
    /// If a live page already holds identical content, its key is returned
    /// instead and nothing is written.
    pub fn add_page(&mut self, content: &[u8]) -> Result<PageKey, Error> {
        let max = self.accessor.storage().config().max_page_size;
        if content.len() > max {
            return Err(Error::InvalidArgument(format!(
                "page of {} bytes exceeds the maximum of {max}",
                content.len()
            )));
        }

        let hash: [u8; 32] = Sha256::digest(content).into();
        let hash_key = layout::page_hash(&hash);
        if let Some(existing) = self.accessor.get_record::<PageKey>(&hash_key)? {
            return Ok(existing);
        }

        let key = PageKey(self.accessor.storage().next_page_id()?);
        let meta = PageMeta {
            size: content.len() as u32,
            hash,
            references: 0,
        };

        self.accessor
            .put(layout::page_content(key.0), Value::from(content))?;
        self.accessor.put_record(layout::page_meta(key.0), &meta)?;
        self.accessor.put_record(hash_key, &key)?;

        debug!(page = %key, size = content.len(), "Added page");
        Ok(key)
    }

    /// Copies the page into the front of `dest` and returns its size.
    ///
    /// Fails with NotFound if the page does not exist in this batch, and with
    /// InvalidArgument if `dest` is smaller than the page.
    pub fn read_page(&mut self, key: PageKey, dest: &mut [u8]) -> Result<usize, Error> {
        let meta = self.meta(key)?;
        let size = meta.size as usize;
        if dest.len() < size {
            return Err(Error::InvalidArgument(format!(
                "buffer of {} bytes cannot hold {key} of {size} bytes",
                dest.len()
            )));
        }

        let content = self.content(key)?;
        if content.len() != size {
            return Err(StorageError::Corruption(format!(
                "{key} holds {} bytes, metadata says {size}",
                content.len()
            ))
            .into());
        }

        dest[..size].copy_from_slice(&content);
        Ok(size)
    }

    /// Returns the size of the page in bytes.
    pub fn page_size(&mut self, key: PageKey) -> Result<usize, Error> {
        Ok(self.meta(key)?.size as usize)
    }

    /// Returns true if the page exists in this batch.
    pub fn contains(&mut self, key: PageKey) -> Result<bool, Error> {
        Ok(self
            .accessor
            .get(&layout::page_meta(key.0))?
            .is_some())
    }

    pub(crate) fn meta(&mut self, key: PageKey) -> Result<PageMeta, Error> {
        self.accessor
            .get_record(&layout::page_meta(key.0))?
            .ok_or_else(|| Error::page_not_found(key))
    }

    /// Loads page content. Must only be called once the page's metadata has
    /// been found in this batch.
    fn content(&mut self, key: PageKey) -> Result<Arc<[u8]>, Error> {
        let content_key = layout::page_content(key.0);
        let cache = self.accessor.storage().page_cache();

        if !self.accessor.is_buffered(&content_key) {
            if let Some(hit) = cache.get(key.0) {
                return Ok(hit);
            }
        }

        let value = self.accessor.get(&content_key)?.ok_or_else(|| {
            StorageError::Corruption(format!("{key} has metadata but no content"))
        })?;
        let content: Arc<[u8]> = Arc::from(value.into_bytes());

        if !self.accessor.is_buffered(&content_key) {
            cache.insert(key.0, Arc::clone(&content));
        }
        Ok(content)
    }

    /// Counts one more file page pointing at `key`.
    pub(crate) fn add_reference(&mut self, key: PageKey) -> Result<PageMeta, Error> {
        let mut meta = self.meta(key)?;
        meta.references = meta.references.checked_add(1).ok_or_else(|| {
            Error::InvalidArgument(format!("{key} has too many references"))
        })?;
        self.accessor.put_record(layout::page_meta(key.0), &meta)?;
        Ok(meta)
    }

    /// Drops one reference to `key`, deleting the page when none remain.
    pub(crate) fn release_reference(&mut self, key: PageKey) -> Result<(), Error> {
        let mut meta = self.meta(key)?;
        meta.references = meta.references.saturating_sub(1);

        if meta.references > 0 {
            return self.accessor.put_record(layout::page_meta(key.0), &meta);
        }

        self.accessor.delete(layout::page_content(key.0))?;
        self.accessor.delete(layout::page_meta(key.0))?;
        self.accessor.delete(layout::page_hash(&meta.hash))?;
        self.accessor.mark_page_deleted(key.0);

        debug!(page = %key, "Deleted unreferenced page");
        Ok(())
    }
}
