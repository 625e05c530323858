//! Ordered binary keys
//!
//! Every key persisted by postmirror is an [`OrderedKey`]: an immutable byte
//! string whose ordering is the store's native comparator.
//!
//! ## Contract
//!
//! These rules are part of the on-disk format and are FROZEN:
//! - Keys compare unsigned-lexicographically over the common length; when the
//!   common bytes are equal the shorter key sorts first
//! - Integer fields are fixed-width big-endian
//! - Signed integer fields have their sign bit flipped so they sort numerically
//! - `successor` never wraps: an all-`0xFF` key has no successor
//!
//! Keys are built once through [`KeyBuilder`] and never mutated afterwards.
//! Cloning copies the bytes; two keys never share a buffer.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use byteorder::{BigEndian, ByteOrder};
use smallvec::SmallVec;

/// Inline capacity for key bytes. All keyspace layouts fit without spilling.
const INLINE_KEY_BYTES: usize = 32;

type KeyBytes = SmallVec<[u8; INLINE_KEY_BYTES]>;

/// Compare two byte strings with the store's ordering
///
/// Compares the first `min(a.len(), b.len())` bytes as unsigned values. If they
/// differ, that decides the order; otherwise the shorter input is smaller.
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use postmirror_core::key::compare_keys;
///
/// assert_eq!(compare_keys(&[0x01], &[0x02]), Ordering::Less);
/// assert_eq!(compare_keys(&[0x01], &[0x01, 0x00]), Ordering::Less);
/// assert_eq!(compare_keys(&[0xFF], &[0x01, 0x00]), Ordering::Greater);
/// ```
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    let common = a.len().min(b.len());
    for (x, y) in a[..common].iter().zip(&b[..common]) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            unequal => return unequal,
        }
    }
    a.len().cmp(&b.len())
}

/// Rolling multiply-xor hash over the key bytes read as signed values
///
/// Only used for in-memory hashing. Never persisted and never used for ordering.
pub fn key_hash(bytes: &[u8]) -> i64 {
    let mut hash: i64 = 37;
    for &byte in bytes {
        hash = hash.wrapping_mul(54059) ^ (byte as i8 as i64).wrapping_mul(76963);
    }
    hash
}

/// Immutable, ordered binary key
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OrderedKey {
    bytes: KeyBytes,
}

impl OrderedKey {
    /// The empty key. It is a prefix of every key and sorts first.
    pub fn empty() -> Self {
        Self {
            bytes: KeyBytes::new(),
        }
    }

    /// Copy `bytes` into a new key
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: KeyBytes::from_slice(bytes),
        }
    }

    /// Start building a key
    pub fn builder() -> KeyBuilder {
        KeyBuilder::new()
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether this is the empty key
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy the key bytes out
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// First `len` bytes as a new key
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the key length.
    pub fn prefix(&self, len: usize) -> OrderedKey {
        assert!(
            len <= self.len(),
            "prefix length {} exceeds key length {}",
            len,
            self.len()
        );
        Self::from_slice(&self.bytes[..len])
    }

    /// Whether `other` starts with every byte of this key
    pub fn is_prefix_of(&self, other: &OrderedKey) -> bool {
        other.bytes.starts_with(&self.bytes)
    }

    /// Key with its bytes in reverse order
    ///
    /// Used for auxiliary reverse-ordered indexes.
    pub fn reversed(&self) -> OrderedKey {
        Self {
            bytes: self.bytes.iter().rev().copied().collect(),
        }
    }

    /// Smallest key of the same length that is strictly greater
    ///
    /// Increments the key as a big-endian unsigned integer. Returns `None` for
    /// the empty key and for an all-`0xFF` key, which have no successor at
    /// their length.
    pub fn successor(&self) -> Option<OrderedKey> {
        let mut bytes = self.bytes.clone();
        for byte in bytes.iter_mut().rev() {
            if *byte == 0xFF {
                *byte = 0x00;
            } else {
                *byte += 1;
                return Some(Self { bytes });
            }
        }
        None
    }

    /// Largest key strictly less than this one
    ///
    /// Decrements the key as a big-endian unsigned integer. When the decrement
    /// borrows out of the most significant byte, the result is the key without
    /// its last byte, which is the largest shorter key below this one.
    ///
    /// # Panics
    ///
    /// Panics when the borrow reaches the most significant byte of a key of
    /// length 0 or 1; no non-empty predecessor exists.
    pub fn predecessor(&self) -> OrderedKey {
        let mut bytes = self.bytes.clone();
        for i in (0..bytes.len()).rev() {
            if bytes[i] != 0x00 {
                bytes[i] -= 1;
                return Self { bytes };
            }
            if i == 0 {
                break;
            }
            bytes[i] = 0xFF;
        }
        assert!(
            self.len() > 1,
            "predecessor of key {} is not representable",
            self
        );
        self.prefix(self.len() - 1)
    }

    /// Smallest key greater than every key that has this key as a prefix
    ///
    /// Returns `None` when no such key exists (empty or all-`0xFF` prefix).
    pub fn prefix_end(&self) -> Option<OrderedKey> {
        let mut bytes = self.bytes.clone();
        while let Some(last) = bytes.pop() {
            if last != 0xFF {
                bytes.push(last + 1);
                return Some(Self { bytes });
            }
        }
        None
    }

    /// In-memory hash of the key bytes
    pub fn stable_hash(&self) -> i64 {
        key_hash(&self.bytes)
    }

    /// Byte at `offset`
    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    /// Big-endian `u16` at `offset`
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        self.field(offset, 2).map(BigEndian::read_u16)
    }

    /// Big-endian `u32` at `offset`
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.field(offset, 4).map(BigEndian::read_u32)
    }

    /// Big-endian `u64` at `offset`
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        self.field(offset, 8).map(BigEndian::read_u64)
    }

    /// Sign-flipped `i8` at `offset`
    pub fn read_i8(&self, offset: usize) -> Option<i8> {
        self.read_u8(offset).map(|v| (v ^ 0x80) as i8)
    }

    /// Sign-flipped `i16` at `offset`
    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|v| (v ^ 0x8000) as i16)
    }

    /// Sign-flipped `i32` at `offset`
    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        self.read_u32(offset).map(|v| (v ^ 0x8000_0000) as i32)
    }

    /// Sign-flipped `i64` at `offset`
    pub fn read_i64(&self, offset: usize) -> Option<i64> {
        self.read_u64(offset)
            .map(|v| (v ^ 0x8000_0000_0000_0000) as i64)
    }

    fn field(&self, offset: usize, width: usize) -> Option<&[u8]> {
        let end = offset.checked_add(width)?;
        self.bytes.get(offset..end)
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.bytes, &other.bytes)
    }
}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for OrderedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i64(self.stable_hash());
    }
}

impl fmt::Display for OrderedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.bytes.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for OrderedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderedKey({})", self)
    }
}

impl From<&[u8]> for OrderedKey {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl From<Vec<u8>> for OrderedKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: KeyBytes::from_vec(bytes),
        }
    }
}

/// Appends fixed-width big-endian fields to produce an [`OrderedKey`]
///
/// # Examples
///
/// ```
/// use postmirror_core::key::OrderedKey;
///
/// let key = OrderedKey::builder().u8(0x01).i64(-5).i32(42).finish();
/// assert_eq!(key.len(), 13);
/// assert_eq!(key.read_i64(1), Some(-5));
/// assert_eq!(key.read_i32(9), Some(42));
/// ```
#[derive(Debug, Default)]
pub struct KeyBuilder {
    bytes: KeyBytes,
}

impl KeyBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte
    pub fn u8(mut self, value: u8) -> Self {
        self.bytes.push(value);
        self
    }

    /// Append a big-endian `u16`
    pub fn u16(self, value: u16) -> Self {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.raw(&buf)
    }

    /// Append a big-endian `u32`
    pub fn u32(self, value: u32) -> Self {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value);
        self.raw(&buf)
    }

    /// Append a big-endian `u64`
    pub fn u64(self, value: u64) -> Self {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value);
        self.raw(&buf)
    }

    /// Append an `i8` with the sign bit flipped
    pub fn i8(self, value: i8) -> Self {
        self.u8((value as u8) ^ 0x80)
    }

    /// Append an `i16` with the sign bit flipped
    pub fn i16(self, value: i16) -> Self {
        self.u16((value as u16) ^ 0x8000)
    }

    /// Append an `i32` with the sign bit flipped
    pub fn i32(self, value: i32) -> Self {
        self.u32((value as u32) ^ 0x8000_0000)
    }

    /// Append an `i64` with the sign bit flipped
    pub fn i64(self, value: i64) -> Self {
        self.u64((value as u64) ^ 0x8000_0000_0000_0000)
    }

    /// Append raw bytes verbatim
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Append another key's bytes
    pub fn key(self, key: &OrderedKey) -> Self {
        self.raw(key.as_bytes())
    }

    /// The encoded key
    pub fn finish(self) -> OrderedKey {
        OrderedKey { bytes: self.bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn key(bytes: &[u8]) -> OrderedKey {
        OrderedKey::from_slice(bytes)
    }

    fn hash_of(key: &OrderedKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    // ========================================
    // Comparison
    // ========================================

    #[test]
    fn test_compare_differing_byte_decides() {
        assert_eq!(compare_keys(&[0x01, 0xFF], &[0x02]), Ordering::Less);
        assert_eq!(compare_keys(&[0x80], &[0x7F]), Ordering::Greater);
    }

    #[test]
    fn test_compare_length_tie_break() {
        assert_eq!(compare_keys(&[0x01, 0x02], &[0x01, 0x02, 0x00]), Ordering::Less);
        assert_eq!(compare_keys(&[0x01, 0x02, 0x00], &[0x01, 0x02]), Ordering::Greater);
        assert_eq!(compare_keys(&[], &[0x00]), Ordering::Less);
        assert_eq!(compare_keys(&[], &[]), Ordering::Equal);
    }

    #[test]
    fn test_ord_matches_compare() {
        let a = key(&[0x05, 0x00]);
        let b = key(&[0x05]);
        assert!(b < a);
        assert_eq!(a.cmp(&b), compare_keys(a.as_bytes(), b.as_bytes()));
    }

    #[test]
    fn test_equality_requires_same_length() {
        assert_ne!(key(&[0x00]), key(&[0x00, 0x00]));
        assert_eq!(key(&[0x01, 0x02]), key(&[0x01, 0x02]));
    }

    // ========================================
    // Integer fields
    // ========================================

    #[test]
    fn test_signed_fields_sort_numerically() {
        let values = [i32::MIN, -100, -1, 0, 1, 100, i32::MAX];
        let keys: Vec<OrderedKey> = values
            .iter()
            .map(|v| OrderedKey::builder().i32(*v).finish())
            .collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_max_values_encode_all_ff() {
        let unsigned = OrderedKey::builder().u64(u64::MAX).finish();
        let signed = OrderedKey::builder().i64(i64::MAX).finish();
        assert_eq!(unsigned.as_bytes(), &[0xFF; 8]);
        assert_eq!(signed.as_bytes(), &[0xFF; 8]);
        assert_eq!(unsigned.read_u64(0), Some(u64::MAX));
        assert_eq!(signed.read_i64(0), Some(i64::MAX));
    }

    #[test]
    fn test_fields_read_back_at_offsets() {
        let k = OrderedKey::builder()
            .u8(7)
            .u16(0xBEEF)
            .i16(-2)
            .u32(9)
            .i8(-128)
            .finish();
        assert_eq!(k.read_u8(0), Some(7));
        assert_eq!(k.read_u16(1), Some(0xBEEF));
        assert_eq!(k.read_i16(3), Some(-2));
        assert_eq!(k.read_u32(5), Some(9));
        assert_eq!(k.read_i8(9), Some(-128));
    }

    #[test]
    fn test_read_out_of_bounds_is_none() {
        let k = key(&[0x01, 0x02, 0x03]);
        assert_eq!(k.read_u32(0), None);
        assert_eq!(k.read_u16(2), None);
        assert_eq!(k.read_u64(usize::MAX), None);
    }

    // ========================================
    // Prefixes
    // ========================================

    #[test]
    fn test_prefix_copies() {
        let k = key(&[1, 2, 3, 4]);
        let p = k.prefix(2);
        assert_eq!(p.as_bytes(), &[1, 2]);
        assert!(p.is_prefix_of(&k));
        assert_eq!(k.prefix(0), OrderedKey::empty());
    }

    #[test]
    #[should_panic(expected = "prefix length")]
    fn test_prefix_too_long_panics() {
        key(&[1]).prefix(2);
    }

    #[test]
    fn test_is_prefix_of() {
        let k = key(&[1, 2, 3]);
        assert!(k.is_prefix_of(&k));
        assert!(OrderedKey::empty().is_prefix_of(&k));
        assert!(OrderedKey::empty().is_prefix_of(&OrderedKey::empty()));
        assert!(!k.is_prefix_of(&OrderedKey::empty()));
        assert!(!key(&[1, 3]).is_prefix_of(&k));
        assert!(!k.is_prefix_of(&key(&[1, 2])));
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(key(&[0x01, 0x02]).prefix_end(), Some(key(&[0x01, 0x03])));
        assert_eq!(key(&[0x01, 0xFF]).prefix_end(), Some(key(&[0x02])));
        assert_eq!(key(&[0xFF, 0xFF]).prefix_end(), None);
        assert_eq!(OrderedKey::empty().prefix_end(), None);
    }

    #[test]
    fn test_reversed() {
        assert_eq!(key(&[1, 2, 3]).reversed(), key(&[3, 2, 1]));
        assert_eq!(OrderedKey::empty().reversed(), OrderedKey::empty());
    }

    // ========================================
    // Successor / predecessor
    // ========================================

    #[test]
    fn test_successor_carries() {
        assert_eq!(key(&[0x00, 0x01]).successor(), Some(key(&[0x00, 0x02])));
        assert_eq!(key(&[0x00, 0xFF]).successor(), Some(key(&[0x01, 0x00])));
        assert_eq!(key(&[0x01, 0xFF, 0xFF]).successor(), Some(key(&[0x02, 0x00, 0x00])));
    }

    #[test]
    fn test_successor_of_all_ff_is_none() {
        assert_eq!(key(&[0xFF, 0xFF]).successor(), None);
        assert_eq!(OrderedKey::empty().successor(), None);
    }

    #[test]
    fn test_predecessor_borrows() {
        assert_eq!(key(&[0x00, 0x02]).predecessor(), key(&[0x00, 0x01]));
        assert_eq!(key(&[0x01, 0x00]).predecessor(), key(&[0x00, 0xFF]));
    }

    #[test]
    fn test_predecessor_underflow_shortens() {
        let k = key(&[0x00, 0x00, 0x00]);
        let p = k.predecessor();
        assert_eq!(p, key(&[0x00, 0x00]));
        assert!(p < k);
    }

    #[test]
    #[should_panic(expected = "not representable")]
    fn test_predecessor_of_single_zero_byte_panics() {
        key(&[0x00]).predecessor();
    }

    #[test]
    fn test_predecessor_of_single_nonzero_byte() {
        assert_eq!(key(&[0x05]).predecessor(), key(&[0x04]));
    }

    #[test]
    fn test_successor_predecessor_inverse() {
        let k = OrderedKey::builder().u8(1).i32(8).finish();
        let s = k.successor().unwrap();
        assert_eq!(s.predecessor(), k);
        assert_eq!(k.predecessor().successor().unwrap(), k);
    }

    // ========================================
    // Hashing and formatting
    // ========================================

    #[test]
    fn test_hash_of_empty_is_seed() {
        assert_eq!(key_hash(&[]), 37);
    }

    #[test]
    fn test_hash_uses_signed_bytes() {
        let expected = 37i64.wrapping_mul(54059) ^ (-1i64).wrapping_mul(76963);
        assert_eq!(key_hash(&[0xFF]), expected);
    }

    #[test]
    fn test_equal_keys_hash_equal() {
        let a = key(&[9, 8, 7]);
        let b = a.clone();
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(key(&[0x00, 0xAB, 0x10]).to_string(), "00ab10");
        assert_eq!(format!("{:?}", key(&[0x01])), "OrderedKey(01)");
    }

    #[test]
    fn test_clone_is_independent() {
        let original = key(&[1, 2, 3]);
        let copy = original.clone();
        assert_ne!(original.as_bytes().as_ptr(), copy.as_bytes().as_ptr());
        assert_eq!(original, copy);
    }
}
