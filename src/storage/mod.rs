// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Versioned key-value engine underneath the transactional layer.
//!
//! The batch executor needs two things from the physical engine: reads that
//! are pinned to a snapshot, and atomic multi-key writes. This module provides
//! both as a multi-version store: every entry is written at a commit
//! [`Version`], and a read at version `v` observes the newest entry of each
//! key written at or before `v`.
//!
//! Two engines implement [`MvccStore`]:
//!
//! - [`RocksMvccStore`]: RocksDB-backed, the production engine.
//! - [`MemoryMvccStore`]: a `BTreeMap` under a lock, for tests and embedding.
//!
//! # Example
//!
//! ```no_run
//! use folio::storage::{Key, MvccEntry, MvccStore, RocksMvccStore, Value, Version};
//! use std::path::Path;
//!
//! let store = RocksMvccStore::open(Path::new("/tmp/folio")).unwrap();
//!
//! store
//!     .batch_write(vec![MvccEntry::new(Key::from("key"), Value::from("value"), Version(1))])
//!     .unwrap();
//!
//! assert_eq!(store.read(&Key::from("key"), Version(0)).unwrap(), None);
//! assert_eq!(
//!     store.read(&Key::from("key"), Version(1)).unwrap(),
//!     Some(Value::from("value"))
//! );
//! ```

mod error;
mod key;
mod memory;
mod mvcc;
mod rocks;

pub use error::StorageError;
pub use key::{decode_mvcc_key, encode_mvcc_key, extract_user_key, prefix_end, user_key_prefix};
pub use memory::MemoryMvccStore;
pub use mvcc::{GcStats, Key, MvccEntry, MvccStore, Value, Version, MAX_KEY_SIZE, MAX_VALUE_SIZE};
pub use rocks::{DurabilityMode, RocksMvccStore};

pub(crate) use mvcc::{decode_value, encode_value, plan_gc, resolve_scan};
