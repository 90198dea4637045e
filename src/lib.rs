// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Folio: paginated transactional storage for a file and document database
//!
//! This crate provides atomic, serializable batches over a versioned
//! key-value engine, page-addressed blob files readable through a seekable
//! stream, and a reduce-key registry whose listings page stably while the
//! registry changes.

pub mod batch;
pub mod config;
pub mod error;
pub mod files;
mod layout;
pub mod map_reduce;
pub mod pages;
pub mod storage;
pub mod stream;

pub use batch::{
    BatchId, BatchStats, CancellationSource, CancellationToken, StorageAccessor,
    TransactionalStorage,
};
pub use config::{StorageConfig, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGES_BATCH_SIZE};
pub use error::{Entity, Error};
pub use files::{FileAndPages, FileCatalog, FileHeader, PageDescriptor};
pub use map_reduce::{ReduceKeyAndType, ReduceKeyRegistry, ReduceType};
pub use pages::{PageKey, PageStore};
pub use storage::{
    DurabilityMode, GcStats, Key, MemoryMvccStore, MvccStore, RocksMvccStore, StorageError,
    Value, Version,
};
pub use stream::StorageStream;
