// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Logical key layout and record codec.
//!
//! Every record family lives under a two-byte tag. String segments are
//! length-prefixed so that a segment can never run into the one after it;
//! integer segments are big-endian so that they sort numerically.
//!
//! | Family | Key                                   | Value             |
//! |--------|---------------------------------------|-------------------|
//! | `fh`   | `fh` name                             | `FileHeader`      |
//! | `fp`   | `fp` len name index:u32               | `PageDescriptor`  |
//! | `pg`   | `pg` page:u64                         | raw page bytes    |
//! | `pm`   | `pm` page:u64                         | `PageMeta`        |
//! | `ph`   | `ph` sha256                           | `PageKey`         |
//! | `rk`   | `rk` len index len reduce-key         | `ReduceKeyRecord` |
//! | `rs`   | `rs` len index sequence:u64           | reduce key        |
//! | `rn`   | `rn` index                            | next sequence     |
//! | `id`   | `id` allocator                        | next free id      |
//! | `cv`   | `cv`                                  | committed version |
//!
//! File header keys carry the bare (case-folded) name so that headers list
//! in name order.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::{prefix_end, Key, StorageError, Value};

const FILE_HEADER: &[u8; 2] = b"fh";
const FILE_PAGE: &[u8; 2] = b"fp";
const PAGE_CONTENT: &[u8; 2] = b"pg";
const PAGE_META: &[u8; 2] = b"pm";
const PAGE_HASH: &[u8; 2] = b"ph";
const REDUCE_RECORD: &[u8; 2] = b"rk";
const REDUCE_ORDER: &[u8; 2] = b"rs";
const REDUCE_NEXT: &[u8; 2] = b"rn";
const ID_BLOCK: &[u8; 2] = b"id";
const COMMITTED_VERSION: &[u8; 2] = b"cv";

/// Builds keys segment by segment.
struct KeyBuilder(Vec<u8>);

impl KeyBuilder {
    fn new(tag: &[u8; 2]) -> Self {
        let mut bytes = Vec::with_capacity(32);
        bytes.extend_from_slice(tag);
        Self(bytes)
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.0.extend_from_slice(bytes);
        self
    }

    fn segment(mut self, s: &str) -> Self {
        self.0.extend_from_slice(&(s.len() as u32).to_be_bytes());
        self.0.extend_from_slice(s.as_bytes());
        self
    }

    fn u32(mut self, n: u32) -> Self {
        self.0.extend_from_slice(&n.to_be_bytes());
        self
    }

    fn u64(mut self, n: u64) -> Self {
        self.0.extend_from_slice(&n.to_be_bytes());
        self
    }

    fn build(self) -> Key {
        Key::new(self.0)
    }
}

/// Half-open range covering every key that starts with `prefix`.
fn prefix_range(prefix: Key) -> (Key, Key) {
    // Every prefix here starts with an ASCII tag, so an end always exists.
    let end = prefix_end(prefix.as_bytes()).unwrap_or_else(|| Key::new(vec![u8::MAX; 9]));
    (prefix, end)
}

pub(crate) fn file_header(identity: &str) -> Key {
    KeyBuilder::new(FILE_HEADER).raw(identity.as_bytes()).build()
}

pub(crate) fn file_headers() -> (Key, Key) {
    prefix_range(KeyBuilder::new(FILE_HEADER).build())
}

pub(crate) fn file_page(identity: &str, index: u32) -> Key {
    KeyBuilder::new(FILE_PAGE).segment(identity).u32(index).build()
}

pub(crate) fn file_pages(identity: &str) -> (Key, Key) {
    prefix_range(KeyBuilder::new(FILE_PAGE).segment(identity).build())
}

pub(crate) fn page_content(page: u64) -> Key {
    KeyBuilder::new(PAGE_CONTENT).u64(page).build()
}

pub(crate) fn page_meta(page: u64) -> Key {
    KeyBuilder::new(PAGE_META).u64(page).build()
}

pub(crate) fn page_hash(hash: &[u8; 32]) -> Key {
    KeyBuilder::new(PAGE_HASH).raw(hash).build()
}

pub(crate) fn reduce_record(index: &str, reduce_key: &str) -> Key {
    KeyBuilder::new(REDUCE_RECORD)
        .segment(index)
        .segment(reduce_key)
        .build()
}

pub(crate) fn reduce_order(index: &str, sequence: u64) -> Key {
    KeyBuilder::new(REDUCE_ORDER).segment(index).u64(sequence).build()
}

pub(crate) fn reduce_orders(index: &str) -> (Key, Key) {
    prefix_range(KeyBuilder::new(REDUCE_ORDER).segment(index).build())
}

pub(crate) fn reduce_next_sequence(index: &str) -> Key {
    KeyBuilder::new(REDUCE_NEXT).raw(index.as_bytes()).build()
}

pub(crate) fn id_block(allocator: &str) -> Key {
    KeyBuilder::new(ID_BLOCK).raw(allocator.as_bytes()).build()
}

pub(crate) fn committed_version() -> Key {
    KeyBuilder::new(COMMITTED_VERSION).build()
}

/// Encodes a record.
pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Value, StorageError> {
    Ok(Value::new(bincode::serialize(record)?))
}

/// Decodes a record.
pub(crate) fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, StorageError> {
    Ok(bincode::deserialize(value.as_bytes())?)
}
