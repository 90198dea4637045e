// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! File catalog: headers and logical page mappings.
//!
//! A file is a header plus an ordered run of [`PageDescriptor`]s, one per
//! logical page index. Files are uploaded page by page with
//! [`put_file`](FileCatalog::put_file),
//! [`associate_page`](FileCatalog::associate_page) and
//! [`complete_file_upload`](FileCatalog::complete_file_upload); only a
//! completed file can be read through [`get_file`](FileCatalog::get_file).
//!
//! File names are case-insensitive: `Abc.txt` and `ABC.TXT` name the same
//! file. The header keeps the name as it was first written.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::StorageAccessor;
use crate::error::Error;
use crate::layout;
use crate::pages::PageKey;
use crate::storage::MvccStore;

/// Catalog record of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Name as first written.
    pub name: String,
    /// Final size; `None` while the upload is in progress.
    pub total_size: Option<u64>,
    /// Size announced when the upload started, if any.
    pub declared_size: Option<u64>,
    /// Sum of the sizes of the associated pages.
    pub uploaded_size: u64,
    /// Number of associated pages.
    pub page_count: u32,
    pub metadata: BTreeMap<String, String>,
}

impl FileHeader {
    /// Returns true once the upload has been completed.
    #[inline]
    pub fn is_upload_complete(&self) -> bool {
        self.total_size.is_some()
    }
}

/// One logical page of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub key: PageKey,
    pub size: u32,
}

/// A contiguous run of a file's pages, starting at logical index `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAndPages {
    pub name: String,
    pub start: u32,
    pub pages: Vec<PageDescriptor>,
}

impl FileAndPages {
    /// Total bytes covered by the run.
    pub fn byte_len(&self) -> u64 {
        self.pages.iter().map(|p| u64::from(p.size)).sum()
    }
}

/// Case-folded identity of a file name.
fn identity(name: &str) -> String {
    name.to_lowercase()
}

/// File operations inside a batch. Obtained from
/// [`StorageAccessor::files`].
pub struct FileCatalog<'t, 'a, S: MvccStore> {
    accessor: &'t mut StorageAccessor<'a, S>,
}

impl<'t, 'a, S: MvccStore> FileCatalog<'t, 'a, S> {
    pub(crate) fn new(accessor: &'t mut StorageAccessor<'a, S>) -> Self {
        Self { accessor }
    }

    fn find(&mut self, id: &str) -> Result<Option<FileHeader>, Error> {
        self.accessor.get_record(&layout::file_header(id))
    }

    fn header(&mut self, name: &str) -> Result<FileHeader, Error> {
        self.find(&identity(name))?
            .ok_or_else(|| Error::file_not_found(name))
    }

    fn write_header(&mut self, header: &FileHeader) -> Result<(), Error> {
        self.accessor
            .put_record(layout::file_header(&identity(&header.name)), header)
    }

    /// All page mappings of a file, in index order.
    fn all_pages(&mut self, id: &str) -> Result<Vec<PageDescriptor>, Error> {
        let (start, end) = layout::file_pages(id);
        self.accessor
            .scan(&start, &end, usize::MAX)?
            .iter()
            .map(|(_, value)| Ok(layout::decode(value)?))
            .collect()
    }

    /// Deletes the header and page mappings and releases the pages.
    fn remove(&mut self, id: &str, header: &FileHeader) -> Result<(), Error> {
        let pages = self.all_pages(id)?;
        for (index, page) in pages.iter().enumerate() {
            self.accessor.delete(layout::file_page(id, index as u32))?;
            self.accessor.pages().release_reference(page.key)?;
        }
        self.accessor.delete(layout::file_header(id))?;

        debug!(file = %header.name, pages = pages.len(), "Removed file");
        Ok(())
    }

    /// Returns the header of `name`.
    pub fn read_file(&mut self, name: &str) -> Result<FileHeader, Error> {
        self.header(name)
    }

    /// Returns up to `count` page descriptors of `name`, starting at logical
    /// page `start`. Fewer are returned only at the end of the file.
    ///
    /// Fails with NotFound if the file is absent or still uploading.
    pub fn get_file(&mut self, name: &str, start: u32, count: usize) -> Result<FileAndPages, Error> {
        let header = self.header(name)?;
        if !header.is_upload_complete() {
            return Err(Error::file_not_found(name));
        }

        let id = identity(name);
        let from = layout::file_page(&id, start);
        let (_, end) = layout::file_pages(&id);
        let pages = self
            .accessor
            .scan(&from, &end, count)?
            .iter()
            .map(|(_, value)| layout::decode(value))
            .collect::<Result<Vec<PageDescriptor>, _>>()?;

        Ok(FileAndPages {
            name: header.name,
            start,
            pages,
        })
    }

    /// Merges `metadata` into the file's metadata map.
    pub fn update_file_metadata(
        &mut self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<FileHeader, Error> {
        let mut header = self.header(name)?;
        header.metadata.extend(metadata);
        self.write_header(&header)?;
        Ok(header)
    }

    /// Deletes the file and releases its pages.
    pub fn delete_file(&mut self, name: &str) -> Result<(), Error> {
        let header = self.header(name)?;
        self.remove(&identity(name), &header)
    }

    /// Starts an upload of `name`, replacing any existing file of that name.
    ///
    /// If `declared_size` is given, completion checks the uploaded size
    /// against it.
    pub fn put_file(
        &mut self,
        name: &str,
        declared_size: Option<u64>,
        metadata: BTreeMap<String, String>,
    ) -> Result<FileHeader, Error> {
        let id = identity(name);
        if let Some(existing) = self.find(&id)? {
            self.remove(&id, &existing)?;
        }

        let header = FileHeader {
            name: name.to_string(),
            total_size: None,
            declared_size,
            uploaded_size: 0,
            page_count: 0,
            metadata,
        };
        self.write_header(&header)?;

        debug!(file = %name, ?declared_size, "Started upload");
        Ok(header)
    }

    /// Appends `page` as logical page `page_index` of an uploading file.
    ///
    /// `page_index` must equal the number of pages already associated.
    pub fn associate_page(
        &mut self,
        name: &str,
        page_index: u32,
        page: PageKey,
    ) -> Result<PageDescriptor, Error> {
        let mut header = self.header(name)?;
        if header.is_upload_complete() {
            return Err(Error::NotSupported(format!(
                "cannot add pages to {name}: upload is complete"
            )));
        }
        if page_index != header.page_count {
            return Err(Error::InvalidArgument(format!(
                "page index {page_index} of {name} is not contiguous, expected {}",
                header.page_count
            )));
        }

        let meta = self.accessor.pages().add_reference(page)?;
        let descriptor = PageDescriptor {
            key: page,
            size: meta.size,
        };

        self.accessor
            .put_record(layout::file_page(&identity(name), page_index), &descriptor)?;
        header.page_count += 1;
        header.uploaded_size += u64::from(meta.size);
        self.write_header(&header)?;

        Ok(descriptor)
    }

    /// Marks the upload of `name` complete, fixing its total size.
    pub fn complete_file_upload(&mut self, name: &str) -> Result<FileHeader, Error> {
        let mut header = self.header(name)?;
        if header.is_upload_complete() {
            return Err(Error::InvalidArgument(format!(
                "upload of {name} is already complete"
            )));
        }
        if let Some(declared) = header.declared_size {
            if declared != header.uploaded_size {
                return Err(Error::InvalidArgument(format!(
                    "{name} declared {declared} bytes but {} were uploaded",
                    header.uploaded_size
                )));
            }
        }

        header.total_size = Some(header.uploaded_size);
        self.write_header(&header)?;

        debug!(file = %name, size = header.uploaded_size, pages = header.page_count, "Completed upload");
        Ok(header)
    }

    /// Renames a file, keeping its pages.
    ///
    /// Changing only the case of the name is allowed. Fails with
    /// InvalidArgument if another file already has the new name.
    pub fn rename_file(&mut self, name: &str, new_name: &str) -> Result<FileHeader, Error> {
        let mut header = self.header(name)?;
        let old_id = identity(name);
        let new_id = identity(new_name);

        if old_id != new_id {
            if self.find(&new_id)?.is_some() {
                return Err(Error::InvalidArgument(format!(
                    "cannot rename {name}: {new_name} already exists"
                )));
            }

            let pages = self.all_pages(&old_id)?;
            for (index, page) in pages.iter().enumerate() {
                self.accessor.delete(layout::file_page(&old_id, index as u32))?;
                self.accessor
                    .put_record(layout::file_page(&new_id, index as u32), page)?;
            }
            self.accessor.delete(layout::file_header(&old_id))?;
        }

        header.name = new_name.to_string();
        self.write_header(&header)?;
        Ok(header)
    }

    /// Returns up to `take` headers in name order, skipping the first `start`.
    pub fn read_files(&mut self, start: usize, take: usize) -> Result<Vec<FileHeader>, Error> {
        let (from, end) = layout::file_headers();
        self.accessor
            .scan(&from, &end, start.saturating_add(take))?
            .iter()
            .skip(start)
            .map(|(_, value)| Ok(layout::decode(value)?))
            .collect()
    }

    /// Returns the number of files, uploads in progress included.
    pub fn file_count(&mut self) -> Result<usize, Error> {
        let (from, end) = layout::file_headers();
        Ok(self.accessor.scan(&from, &end, usize::MAX)?.len())
    }
}
