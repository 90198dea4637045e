// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! MVCC key encoding and decoding.
//!
//! Encodes user keys with their commit version for the underlying engine.
//! Format: `[escaped key bytes][0x00 0x01][MAX-version:u64 BE]`
//!
//! Every `0x00` in the user key is written as `0x00 0xFF`, and the key is
//! closed with the terminator `0x00 0x01`. The escaped form is prefix-free and
//! preserves byte order, so:
//!
//! - encoded keys sort by user key first, for any user keys,
//! - all versions of one user key are contiguous,
//! - a range `[start, end)` of user keys is a contiguous range of encoded keys.
//!
//! The version is inverted (MAX - value) so that newer versions sort first
//! within the same user key under a byte-order comparator.

use super::{Key, StorageError, Version};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;
const VERSION_LEN: usize = 8;

/// Encodes a user key with a version into an engine key.
#[inline]
pub fn encode_mvcc_key(key: &Key, version: Version) -> Vec<u8> {
    let mut encoded = user_key_prefix(key);
    encoded.extend_from_slice(&(u64::MAX - version.get()).to_be_bytes());
    encoded
}

/// Decodes an engine key back into user key and version.
pub fn decode_mvcc_key(encoded: &[u8]) -> Result<(Key, Version), StorageError> {
    let (key, consumed) = unescape(encoded)?;

    let version_bytes = &encoded[consumed..];
    if version_bytes.len() != VERSION_LEN {
        return Err(StorageError::InvalidKeyEncoding(format!(
            "expected {} version bytes, got {}",
            VERSION_LEN,
            version_bytes.len()
        )));
    }

    let mut inverted = [0u8; VERSION_LEN];
    inverted.copy_from_slice(version_bytes);
    let version = u64::MAX - u64::from_be_bytes(inverted);

    Ok((key, Version(version)))
}

/// Returns the prefix shared by every version of a user key.
///
/// This is also the smallest encoded key of the user key, so it is the seek
/// position for a scan starting at `key`.
#[inline]
pub fn user_key_prefix(key: &Key) -> Vec<u8> {
    let bytes = key.as_bytes();
    let mut prefix = Vec::with_capacity(bytes.len() + 2 + VERSION_LEN);
    for &byte in bytes {
        prefix.push(byte);
        if byte == ESCAPE {
            prefix.push(ESCAPED_ZERO);
        }
    }
    prefix.push(ESCAPE);
    prefix.push(TERMINATOR);
    prefix
}

/// Extracts the user key from an encoded MVCC key without decoding the version.
pub fn extract_user_key(encoded: &[u8]) -> Result<Key, StorageError> {
    unescape(encoded).map(|(key, _)| key)
}

/// Returns the smallest key greater than every key starting with `prefix`.
///
/// Returns `None` when no such key exists (the prefix is empty or all `0xFF`).
pub fn prefix_end(prefix: &[u8]) -> Option<Key> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(Key::new(end));
        }
    }
    None
}

/// Unescapes the user key part, returning it and the number of bytes consumed
/// including the terminator.
fn unescape(encoded: &[u8]) -> Result<(Key, usize), StorageError> {
    let mut key = Vec::with_capacity(encoded.len().saturating_sub(2 + VERSION_LEN));
    let mut i = 0;

    while i < encoded.len() {
        let byte = encoded[i];
        if byte != ESCAPE {
            key.push(byte);
            i += 1;
            continue;
        }

        match encoded.get(i + 1) {
            Some(&ESCAPED_ZERO) => {
                key.push(ESCAPE);
                i += 2;
            }
            Some(&TERMINATOR) => return Ok((Key::new(key), i + 2)),
            Some(other) => {
                return Err(StorageError::InvalidKeyEncoding(format!(
                    "invalid escape sequence 0x00 {:#04x} at offset {}",
                    other, i
                )))
            }
            None => break,
        }
    }

    Err(StorageError::InvalidKeyEncoding(
        "missing key terminator".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = Key::from("hello");
        let version = Version(42);

        let encoded = encode_mvcc_key(&key, version);
        let (decoded_key, decoded_version) = decode_mvcc_key(&encoded).unwrap();

        assert_eq!(key, decoded_key);
        assert_eq!(version, decoded_version);
    }

    #[test]
    fn test_encode_decode_embedded_zeros() {
        let key = Key::new(vec![0, 1, 0, 0, 0xFF, 0]);
        let encoded = encode_mvcc_key(&key, Version(7));
        let (decoded_key, decoded_version) = decode_mvcc_key(&encoded).unwrap();

        assert_eq!(key, decoded_key);
        assert_eq!(decoded_version, Version(7));
    }

    #[test]
    fn test_encode_decode_empty_key() {
        let key = Key::from(Vec::<u8>::new());
        let encoded = encode_mvcc_key(&key, Version::ZERO);
        let (decoded_key, decoded_version) = decode_mvcc_key(&encoded).unwrap();

        assert_eq!(key, decoded_key);
        assert_eq!(decoded_version, Version::ZERO);
    }

    #[test]
    fn test_newer_versions_sort_first() {
        let key = Key::from("key");

        let encoded_old = encode_mvcc_key(&key, Version(100));
        let encoded_new = encode_mvcc_key(&key, Version(200));

        assert!(encoded_new < encoded_old, "newer version should sort first");
    }

    #[test]
    fn test_prefix_keys_sort_before_extensions() {
        // "ab" and every version of it must sort before "ab\0" and "ab\x01".
        let short = encode_mvcc_key(&Key::from("ab"), Version(0));
        let zero_ext = encode_mvcc_key(&Key::new(b"ab\0".to_vec()), Version(u64::MAX));
        let one_ext = encode_mvcc_key(&Key::new(b"ab\x01".to_vec()), Version(u64::MAX));

        assert!(short < zero_ext);
        assert!(zero_ext < one_ext);
    }

    #[test]
    fn test_user_key_prefix() {
        let key = Key::from("hello");
        let prefix = user_key_prefix(&key);

        assert!(encode_mvcc_key(&key, Version(1)).starts_with(&prefix));
        assert!(encode_mvcc_key(&key, Version(2)).starts_with(&prefix));
        assert!(!encode_mvcc_key(&Key::from("hello!"), Version(1)).starts_with(&prefix));
    }

    #[test]
    fn test_extract_user_key() {
        let key = Key::from("hello");
        let encoded = encode_mvcc_key(&key, Version(9));
        assert_eq!(extract_user_key(&encoded).unwrap(), key);
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ab"), Some(Key::from("ac")));
        assert_eq!(prefix_end(&[b'a', 0xFF]), Some(Key::from("b")));
        assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_end(b""), None);
    }

    #[test]
    fn test_decode_missing_terminator() {
        assert!(decode_mvcc_key(b"abc").is_err());
        assert!(decode_mvcc_key(&[b'a', 0]).is_err());
    }

    #[test]
    fn test_decode_bad_escape() {
        assert!(decode_mvcc_key(&[b'a', 0, 0x42, 0, 1]).is_err());
    }

    #[test]
    fn test_decode_wrong_version_length() {
        let mut encoded = encode_mvcc_key(&Key::from("k"), Version(1));
        encoded.pop();
        assert!(decode_mvcc_key(&encoded).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn mvcc_key_roundtrip(
            key_bytes in prop::collection::vec(any::<u8>(), 0..100),
            version in any::<u64>(),
        ) {
            let key = Key::new(key_bytes);
            let encoded = encode_mvcc_key(&key, Version(version));
            let (decoded_key, decoded_version) = decode_mvcc_key(&encoded).unwrap();

            prop_assert_eq!(key, decoded_key);
            prop_assert_eq!(Version(version), decoded_version);
        }

        #[test]
        fn encoding_preserves_user_key_order(
            a in prop::collection::vec(any::<u8>(), 0..20),
            b in prop::collection::vec(any::<u8>(), 0..20),
            va in any::<u64>(),
            vb in any::<u64>(),
        ) {
            prop_assume!(a != b);
            let ea = encode_mvcc_key(&Key::new(a.clone()), Version(va));
            let eb = encode_mvcc_key(&Key::new(b.clone()), Version(vb));

            prop_assert_eq!(a < b, ea < eb);
        }

        #[test]
        fn newer_always_sorts_first(
            key_bytes in prop::collection::vec(any::<u8>(), 0..50),
            old in 0u64..1_000_000_000,
            gap in 1u64..1_000_000,
        ) {
            let key = Key::new(key_bytes);
            let encoded_old = encode_mvcc_key(&key, Version(old));
            let encoded_new = encode_mvcc_key(&key, Version(old + gap));

            prop_assert!(encoded_new < encoded_old, "newer should sort first");
        }
    }
}
