//! Turning keys into directory addresses.
//!
//! The directory is persisted, so the bits a key hashes to must be the same in
//! every process that opens the index, on every platform. `std`'s `RandomState`
//! is salted per process, and `std::hash::Hash` feeds native-endian integers
//! and `usize` length prefixes, so neither is used here. Keys are hashed over
//! their fixed little-endian record encoding instead.

use crate::bytes::EncodeRecord;
use std::fmt;
use twox_hash::XxHash64;

/// Seed for [`XxKeyHasher`]. Changing it invalidates every index on disk.
pub const HASH_SEED: u64 = 0;

/// Maps a key to a wide hash. Only the low-order `D` bits are used.
pub trait KeyHasher<K: ?Sized> {
    fn hash_key(&self, key: &K) -> u64;
}

/// Default hasher: XxHash64 with a fixed seed over the key's encoded bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct XxKeyHasher;

impl<K: EncodeRecord> KeyHasher<K> for XxKeyHasher {
    fn hash_key(&self, key: &K) -> u64 {
        let mut buf = vec![0_u8; K::WIDTH];
        key.encode_into(&mut buf);
        XxHash64::oneshot(HASH_SEED, &buf)
    }
}

impl<K: ?Sized, F> KeyHasher<K> for F
where
    F: Fn(&K) -> u64,
{
    fn hash_key(&self, key: &K) -> u64 {
        self(key)
    }
}

/// Mask selecting the low `bits` bits of a u64.
pub fn low_mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1_u64 << bits) - 1
    }
}

/// A `D`-bit address: the low-order `width` bits of a key's hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HashBits {
    value: u64,
    width: u8,
}

impl HashBits {
    /// Keeps the low `width` bits of `hash`.
    pub fn new(hash: u64, width: u8) -> Self {
        Self {
            value: hash & low_mask(width),
            width,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Bit at `position`, counting from the least significant bit.
    pub fn bit(&self, position: u8) -> bool {
        position < self.width && (self.value >> position) & 1 == 1
    }

    /// The low `count` bits, the part an entry at local depth `count` compares.
    pub fn low_bits(&self, count: u8) -> u64 {
        self.value & low_mask(count)
    }
}

/// Most significant bit first, `width` characters.
impl fmt::Display for HashBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for position in (0..self.width).rev() {
            f.write_str(if self.bit(position) { "1" } else { "0" })?;
        }
        Ok(())
    }
}
