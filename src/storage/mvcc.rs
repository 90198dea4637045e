// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! MVCC types and trait definitions.

use super::error::StorageError;
use super::key::decode_mvcc_key;

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 8 * 1024; // 8KB

/// Maximum value size in bytes.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024; // 64MB

const TOMBSTONE_TAG: u8 = 0;
const VALUE_TAG: u8 = 1;

/// A key in the MVCC store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub Vec<u8>);

impl Key {
    /// Creates a new key from bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the key.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `self` lies in the half-open range `[start, end)`.
    #[inline]
    pub fn within(&self, start: &Key, end: &Key) -> bool {
        self >= start && self < end
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A value in the MVCC store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(pub Vec<u8>);

impl Value {
    /// Creates a new value from bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the value bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the value.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the value is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the value, returning its bytes.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A commit version.
///
/// Versions are assigned by the batch executor, one per committed batch, in
/// strictly increasing order. A reader at version `v` sees every entry written
/// at a version `<= v` and nothing newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u64);

impl Version {
    /// The version before any commit.
    pub const ZERO: Version = Version(0);

    /// Reads at this version observe the newest entry of every key.
    pub const LATEST: Version = Version(u64::MAX);

    /// Returns the raw version number.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Returns the version that follows this one.
    #[inline]
    pub fn next(&self) -> Version {
        Version(self.0.saturating_add(1))
    }
}

/// A versioned key-value entry.
#[derive(Debug, Clone)]
pub struct MvccEntry {
    pub key: Key,
    pub value: Option<Value>, // None = tombstone
    pub version: Version,
}

impl MvccEntry {
    /// Creates a new entry with a value.
    pub fn new(key: Key, value: Value, version: Version) -> Self {
        Self {
            key,
            value: Some(value),
            version,
        }
    }

    /// Creates a tombstone entry (deletion marker).
    pub fn tombstone(key: Key, version: Version) -> Self {
        Self {
            key,
            value: None,
            version,
        }
    }

    /// Returns true if this entry is a tombstone.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Statistics from garbage collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub versions_scanned: u64,
    pub versions_deleted: u64,
    pub bytes_reclaimed: u64,
}

/// The versioned key-value engine trait.
///
/// This is the raw key-value surface the transactional layer is built on.
/// Implementations must apply `batch_write` atomically: after it returns, all
/// of the batch's entries are visible to readers at the batch version, and
/// before it returns none of them are.
pub trait MvccStore: Send + Sync {
    /// Reads the newest value of `key` written at a version `<= version`.
    ///
    /// Returns `None` if no such version exists or it is a tombstone.
    fn read(&self, key: &Key, version: Version) -> Result<Option<Value>, StorageError>;

    /// Scans live keys in `[start, end)` as of `version`, in ascending key
    /// order, returning at most `limit` entries.
    fn scan(
        &self,
        start: &Key,
        end: &Key,
        version: Version,
        limit: usize,
    ) -> Result<Vec<(Key, Value)>, StorageError>;

    /// Atomically writes a batch of entries.
    fn batch_write(&self, entries: Vec<MvccEntry>) -> Result<(), StorageError>;

    /// Removes versions that no reader at `safe` or later can observe.
    ///
    /// For each key the newest version at or below `safe` is kept (or dropped
    /// if it is a tombstone), every older version is deleted, and versions
    /// above `safe` are left alone.
    fn gc(&self, safe: Version) -> Result<GcStats, StorageError>;
}

/// Encodes an optional value into its stored form.
pub(crate) fn encode_value(value: Option<&Value>) -> Vec<u8> {
    match value {
        Some(value) => {
            let mut stored = Vec::with_capacity(value.len() + 1);
            stored.push(VALUE_TAG);
            stored.extend_from_slice(value.as_bytes());
            stored
        }
        None => vec![TOMBSTONE_TAG],
    }
}

/// Decodes a stored value. `None` means tombstone.
pub(crate) fn decode_value(stored: &[u8]) -> Result<Option<Value>, StorageError> {
    match stored.split_first() {
        Some((&VALUE_TAG, rest)) => Ok(Some(Value::new(rest.to_vec()))),
        Some((&TOMBSTONE_TAG, [])) => Ok(None),
        Some((tag, _)) => Err(StorageError::Corruption(format!(
            "unknown value tag {:#04x}",
            tag
        ))),
        None => Err(StorageError::Corruption("empty stored value".to_string())),
    }
}

/// Resolves a forward iteration over encoded entries into the visible rows of
/// `[start, end)` at `version`.
///
/// The iterator must be positioned at or before the first version of `start`
/// and yield encoded keys in ascending byte order.
pub(crate) fn resolve_scan<I, K, V>(
    iter: I,
    end: &Key,
    version: Version,
    limit: usize,
) -> Result<Vec<(Key, Value)>, StorageError>
where
    I: IntoIterator<Item = Result<(K, V), StorageError>>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut results = Vec::with_capacity(limit.min(1000));
    let mut resolved_key: Option<Key> = None;

    for item in iter {
        if results.len() >= limit {
            break;
        }

        let (encoded_key, stored) = item?;
        let (key, entry_version) = decode_mvcc_key(encoded_key.as_ref())?;

        if &key >= end {
            break;
        }

        // Newer versions sort first; once a visible one is found the rest of
        // this key's versions are shadowed.
        if resolved_key.as_ref() == Some(&key) {
            continue;
        }

        if entry_version > version {
            continue;
        }

        let value = decode_value(stored.as_ref())?;
        resolved_key = Some(key.clone());

        if let Some(value) = value {
            results.push((key, value));
        }
    }

    Ok(results)
}

/// Walks every encoded entry in ascending order and selects the ones `gc`
/// should delete.
///
/// A key's versions below its floor are listed before a floor tombstone, so
/// applying the deletions in order in several write batches never exposes a
/// value the tombstone was hiding.
pub(crate) fn plan_gc<I, K, V>(
    iter: I,
    safe: Version,
) -> Result<(Vec<Vec<u8>>, GcStats), StorageError>
where
    I: IntoIterator<Item = Result<(K, V), StorageError>>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut stats = GcStats::default();
    let mut to_delete = Vec::new();
    let mut current_key: Option<Key> = None;
    let mut floor_seen = false;
    let mut floor_tombstone: Option<Vec<u8>> = None;

    for item in iter {
        stats.versions_scanned += 1;

        let (encoded_key, stored) = item?;
        let encoded_key = encoded_key.as_ref();
        let stored = stored.as_ref();
        let (key, entry_version) = decode_mvcc_key(encoded_key)?;

        if current_key.as_ref() != Some(&key) {
            to_delete.extend(floor_tombstone.take());
            current_key = Some(key);
            floor_seen = false;
        }

        if entry_version > safe {
            continue;
        }

        let reclaimed = (encoded_key.len() + stored.len()) as u64;
        if floor_seen {
            to_delete.push(encoded_key.to_vec());
        } else {
            floor_seen = true;
            if decode_value(stored)?.is_some() {
                continue;
            }
            floor_tombstone = Some(encoded_key.to_vec());
        }

        stats.versions_deleted += 1;
        stats.bytes_reclaimed += reclaimed;
    }
    to_delete.extend(floor_tombstone);

    Ok((to_delete, stats))
}
