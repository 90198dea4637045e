// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Seekable read cursor over a stored file.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::batch::TransactionalStorage;
use crate::error::Error;
use crate::files::{FileAndPages, FileHeader, PageDescriptor};
use crate::storage::{MvccStore, RocksMvccStore, StorageError};

/// A window of consecutive pages and the byte range they cover.
#[derive(Debug)]
struct PageFrame {
    pages: FileAndPages,
    /// File offset of the first byte of the frame.
    offset: u64,
    /// Bytes covered by the frame.
    len: u64,
}

impl PageFrame {
    fn new(pages: FileAndPages, offset: u64) -> Self {
        let len = pages.byte_len();
        Self { pages, offset, len }
    }

    #[inline]
    fn end(&self) -> u64 {
        self.offset + self.len
    }

    #[inline]
    fn covers(&self, position: u64) -> bool {
        self.offset <= position && position < self.end()
    }

    fn next_index(&self) -> u32 {
        self.pages.start + self.pages.pages.len() as u32
    }

    /// The page holding `position` and the file offset it starts at.
    fn page_at(&self, position: u64) -> Option<(PageDescriptor, u64)> {
        let mut start = self.offset;
        for page in &self.pages.pages {
            let end = start + u64::from(page.size);
            if start <= position && position < end {
                return Some((*page, start));
            }
            start = end;
        }
        None
    }
}

/// Read-only, seekable view of a completed file.
///
/// The stream holds no batch open between calls. Each frame fetch and each
/// page read runs in its own short batch, so a stream sees every fetch
/// consistently but may observe changes made between two fetches.
///
/// A read returns bytes from at most one page; use
/// [`read_exact`](std::io::Read::read_exact) or
/// [`read_to_end`](std::io::Read::read_to_end) to read across pages.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use std::io::Read;
/// use std::sync::Arc;
///
/// use folio::{Error, StorageStream, TransactionalStorage};
///
/// let storage = Arc::new(TransactionalStorage::in_memory(Default::default()).unwrap());
/// storage
///     .batch(|a| {
///         a.files().put_file("greeting.txt", None, BTreeMap::new())?;
///         let page = a.pages().add_page(b"hello")?;
///         a.files().associate_page("greeting.txt", 0, page)?;
///         a.files().complete_file_upload("greeting.txt")?;
///         Ok::<_, Error>(())
///     })
///     .unwrap();
///
/// let mut stream = StorageStream::open(storage, "greeting.txt").unwrap();
/// let mut content = String::new();
/// stream.read_to_string(&mut content).unwrap();
/// assert_eq!(content, "hello");
/// ```
pub struct StorageStream<S: MvccStore = RocksMvccStore> {
    storage: Arc<TransactionalStorage<S>>,
    header: FileHeader,
    len: u64,
    position: u64,
    frame: Option<PageFrame>,
    page_buffer: Vec<u8>,
}

impl<S: MvccStore> StorageStream<S> {
    /// Opens a stream over `name`.
    ///
    /// Fails with NotFound if the file does not exist or its upload is not
    /// complete.
    pub fn open(storage: Arc<TransactionalStorage<S>>, name: &str) -> Result<Self, Error> {
        let header = storage.batch(|a| a.files().read_file(name))?;
        let len = header
            .total_size
            .ok_or_else(|| Error::file_not_found(name))?;
        let page_buffer = vec![0u8; storage.config().max_page_size];

        Ok(Self {
            storage,
            header,
            len,
            position: 0,
            frame: None,
            page_buffer,
        })
    }

    /// Name of the file, as stored.
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// The header read when the stream was opened.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// File size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn can_read(&self) -> bool {
        true
    }

    pub fn can_seek(&self) -> bool {
        true
    }

    /// Moves the cursor and returns the new offset.
    ///
    /// `SeekFrom::End(n)` is relative to the file size: `End(0)` is the end
    /// of the file and `End(-1)` its last byte. Seeking past the end is
    /// allowed; reads there return 0. Seeking before the start fails with
    /// InvalidArgument.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => (offset, 0),
            SeekFrom::Current(delta) => (self.position, delta),
            SeekFrom::End(delta) => (self.len, delta),
        };

        let target = i128::from(base) + i128::from(delta);
        let target = u64::try_from(target).map_err(|_| {
            Error::InvalidArgument(format!("cannot seek {} to offset {target}", self.header.name))
        })?;

        self.move_to(target)?;
        Ok(self.position)
    }

    /// Reads from the page holding the current offset into `buf`.
    ///
    /// Returns 0 at or past the end of the file, or if `buf` is empty.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.position >= self.len || buf.is_empty() {
            return Ok(0);
        }

        self.move_to(self.position)?;
        let (page, page_start) = self
            .frame
            .as_ref()
            .and_then(|frame| frame.page_at(self.position))
            .ok_or_else(|| self.missing_page(self.position))?;

        let key = page.key;
        let page_buffer = &mut self.page_buffer;
        let size = self
            .storage
            .batch(|a| a.pages().read_page(key, page_buffer))?;

        let within = (self.position - page_start) as usize;
        let count = size.saturating_sub(within).min(buf.len());
        buf[..count].copy_from_slice(&self.page_buffer[within..within + count]);
        self.position += count as u64;

        trace!(file = %self.header.name, page = %key, count, position = self.position, "Read from page");
        Ok(count)
    }

    /// Positions the cursor at `target`, fetching the frame that covers it.
    fn move_to(&mut self, target: u64) -> Result<(), Error> {
        if target >= self.len {
            self.position = target;
            return Ok(());
        }

        let mut frame = match self.frame.take() {
            Some(frame) if frame.offset <= target => frame,
            _ => self.fetch(0, 0)?,
        };

        while !frame.covers(target) {
            if frame.pages.pages.is_empty() {
                return Err(self.missing_page(target));
            }
            let (next, offset) = (frame.next_index(), frame.end());
            frame = self.fetch(next, offset)?;
        }

        self.frame = Some(frame);
        self.position = target;
        Ok(())
    }

    /// Fetches the frame starting at logical page `start`.
    ///
    /// Fails with NotFound once the file was deleted or replaced by a file of
    /// a different layout since the stream was opened.
    fn fetch(&self, start: u32, offset: u64) -> Result<PageFrame, Error> {
        let count = self.storage.config().pages_batch_size;
        let name = &self.header.name;
        let (header, pages) = self.storage.batch(|a| {
            let mut files = a.files();
            let header = files.read_file(name)?;
            let pages = files.get_file(name, start, count)?;
            Ok::<_, Error>((header, pages))
        })?;

        if header.total_size != self.header.total_size
            || header.page_count != self.header.page_count
        {
            debug!(file = %name, "File replaced under an open stream");
            return Err(Error::file_not_found(name));
        }

        trace!(file = %name, start, pages = pages.pages.len(), offset, "Fetched page frame");
        Ok(PageFrame::new(pages, offset))
    }

    fn missing_page(&self, position: u64) -> Error {
        StorageError::Corruption(format!(
            "{} has {} bytes but no page holds offset {position}",
            self.header.name, self.len
        ))
        .into()
    }
}

impl<S: MvccStore> Read for StorageStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl<S: MvccStore> Seek for StorageStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }
}
