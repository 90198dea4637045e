// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Atomic, serializable batches over the versioned store.
//!
//! # Key Concepts
//!
//! ## Snapshots
//!
//! Every commit advances a single committed version. A batch reads at the
//! committed version current when it started, so it never sees a partial
//! commit or a commit that happened while it ran. Its own writes are
//! buffered in the batch and overlay the snapshot for its reads.
//!
//! ## Commit validation
//!
//! Batches take no locks while they run. At commit, under a short commit
//! lock, the batch is checked against the write sets of the batches that
//! committed after its snapshot. Any overlap with a key it read, a range it
//! scanned or a key it wrote aborts it with
//! [`Error::ConflictAborted`](crate::Error::ConflictAborted). Read-only
//! batches always succeed.
//!
//! ## Identifiers
//!
//! Page keys come from a high/low allocator whose blocks are reserved by
//! commits of their own, so allocating pages never makes two batches
//! conflict.
//!
//! # Example
//!
//! ```
//! use folio::{Error, ReduceType, TransactionalStorage};
//!
//! let storage = TransactionalStorage::in_memory(Default::default()).unwrap();
//!
//! storage
//!     .batch(|accessor| {
//!         let mut registry = accessor.map_reduce();
//!         registry.update_performed_reduce_type("view1", "key1", ReduceType::SingleStep)?;
//!         registry.update_performed_reduce_type("view1", "key2", ReduceType::MultiStep)?;
//!         Ok::<_, Error>(())
//!     })
//!     .unwrap();
//!
//! let count = storage
//!     .batch(|accessor| accessor.map_reduce().count_reduce_keys("view1"))
//!     .unwrap();
//! assert_eq!(count, 2);
//! ```

mod accessor;
mod cancel;
mod executor;
mod ids;
mod transaction;
mod validation;

pub use accessor::StorageAccessor;
pub use cancel::{CancellationSource, CancellationToken};
pub use executor::{BatchStats, TransactionalStorage};
pub use transaction::BatchId;
