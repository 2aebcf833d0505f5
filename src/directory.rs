//! The in-memory directory: a set of entries whose bit prefixes partition the
//! space of `D`-bit hash addresses.

use crate::bytes::{get_i64_le, put_i64_le};
use crate::consts::INT_SIZE;
use crate::error::{IndexError, Result};
use crate::hasher::{low_mask, HashBits};
use tracing::debug;

/// One slice of the address space and the bucket holding its records.
///
/// An entry at local depth `d` claims every `D`-bit string whose low `d` bits
/// equal `prefix`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    local_depth: u8,
    prefix: u64,
    bucket_ref: u64,
}

impl DirectoryEntry {
    pub fn new(local_depth: u8, prefix: u64, bucket_ref: u64) -> Self {
        Self {
            local_depth,
            prefix: prefix & low_mask(local_depth),
            bucket_ref,
        }
    }

    pub fn local_depth(&self) -> u8 {
        self.local_depth
    }

    pub fn prefix(&self) -> u64 {
        self.prefix
    }

    pub fn bucket_ref(&self) -> u64 {
        self.bucket_ref
    }

    pub fn matches(&self, bits: &HashBits) -> bool {
        bits.low_bits(self.local_depth) == self.prefix
    }

    /// The prefix as `local_depth` ASCII digits, most significant first.
    /// The root entry has the empty prefix.
    pub fn prefix_string(&self) -> String {
        (0..self.local_depth)
            .rev()
            .map(|position| {
                if (self.prefix >> position) & 1 == 1 {
                    '1'
                } else {
                    '0'
                }
            })
            .collect()
    }

    /// The addresses this entry claims as a range, once every `D`-bit string
    /// is read with its bits reversed. A low-order prefix then becomes a
    /// high-order one, so the entry claims one contiguous run.
    fn reversed_range(&self, global_depth: u8) -> (u128, u128) {
        let reversed = if self.local_depth == 0 {
            0
        } else {
            self.prefix.reverse_bits() >> (64 - self.local_depth)
        };
        let width = 1_u128 << (global_depth - self.local_depth);
        let start = (reversed as u128) << (global_depth - self.local_depth);
        (start, start + width)
    }
}

/// Directory of an extendible hash file.
///
/// ## File layout
/// The directory file is a flat run of entries with no header, rewritten in
/// full on every flush. Each entry is `8 + (D + 1) + 8` bytes:
/// - `local_depth` as an i64 LE
/// - the prefix as `D + 1` bytes: `local_depth` ASCII `'0'`/`'1'` digits, most
///   significant first, then NUL padding
/// - `bucket_ref`, the byte offset of the bucket in the bucket file, as an i64 LE
#[derive(Clone, Debug)]
pub struct Directory {
    global_depth: u8,
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// A fresh directory: one entry at depth 0 covering everything.
    pub fn new(global_depth: u8, root_bucket: u64) -> Self {
        Self {
            global_depth,
            entries: vec![DirectoryEntry::new(0, 0, root_bucket)],
        }
    }

    pub fn global_depth(&self) -> u8 {
        self.global_depth
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_local_depth(&self) -> u8 {
        self.entries
            .iter()
            .map(DirectoryEntry::local_depth)
            .max()
            .unwrap_or(0)
    }

    pub fn entry(&self, index: usize) -> &DirectoryEntry {
        &self.entries[index]
    }

    /// Position of the one entry matching `bits`.
    pub fn lookup_index(&self, bits: &HashBits) -> Result<usize> {
        self.entries
            .iter()
            .position(|entry| entry.matches(bits))
            .ok_or_else(|| IndexError::LookupInconsistency {
                bits: bits.to_string(),
            })
    }

    /// Bucket holding the records whose hash is `bits`.
    pub fn lookup(&self, bits: &HashBits) -> Result<u64> {
        Ok(self.entries[self.lookup_index(bits)?].bucket_ref)
    }

    /// Replaces the entry at `index` with its two children one level deeper.
    ///
    /// The child whose new bit (at position `local_depth`) is 0 takes
    /// `bucket_refs[0]` and the slot of the old entry; the child with a 1 bit
    /// takes `bucket_refs[1]` and is appended. No other entry changes.
    pub fn split(
        &mut self,
        index: usize,
        bucket_refs: [u64; 2],
    ) -> Result<(DirectoryEntry, DirectoryEntry)> {
        let old = &self.entries[index];
        if old.local_depth >= self.global_depth {
            return Err(IndexError::AddressSpaceExhausted {
                depth: old.local_depth,
            });
        }
        let depth = old.local_depth + 1;
        let zero = DirectoryEntry::new(depth, old.prefix, bucket_refs[0]);
        let one = DirectoryEntry::new(depth, old.prefix | (1 << old.local_depth), bucket_refs[1]);
        debug!(
            prefix = %old.prefix_string(),
            old_bucket = old.bucket_ref,
            zero_bucket = zero.bucket_ref,
            one_bucket = one.bucket_ref,
            depth,
            "split directory entry"
        );
        self.entries[index] = zero.clone();
        self.entries.push(one.clone());
        Ok((zero, one))
    }

    /// Checks that the entries cover every `D`-bit string exactly once.
    pub fn verify(&self) -> Result<()> {
        let mut ranges = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.local_depth > self.global_depth {
                return Err(IndexError::CorruptDirectory(format!(
                    "entry {} has local depth {} above global depth {}",
                    i, entry.local_depth, self.global_depth
                )));
            }
            let (start, end) = entry.reversed_range(self.global_depth);
            ranges.push((start, end, i));
        }
        ranges.sort_unstable();

        let mut covered: u128 = 0;
        let mut previous: Option<usize> = None;
        for (start, end, i) in ranges {
            if start < covered {
                let other = previous.map(|p| self.entries[p].prefix_string()).unwrap_or_default();
                return Err(IndexError::CorruptDirectory(format!(
                    "prefixes '{}' and '{}' overlap",
                    other,
                    self.entries[i].prefix_string()
                )));
            }
            if start > covered {
                break;
            }
            covered = end;
            previous = Some(i);
        }
        let total = 1_u128 << self.global_depth;
        if covered != total {
            return Err(IndexError::CorruptDirectory(format!(
                "entries leave addresses uncovered, first gap at reversed address {} of {}",
                covered, total
            )));
        }
        Ok(())
    }

    pub fn entry_size(global_depth: u8) -> usize {
        2 * INT_SIZE + global_depth as usize + 1
    }

    pub fn encode(&self) -> Vec<u8> {
        let entry_size = Self::entry_size(self.global_depth);
        let mut buf = vec![0_u8; entry_size * self.entries.len()];
        for (entry, chunk) in self.entries.iter().zip(buf.chunks_exact_mut(entry_size)) {
            put_i64_le(chunk, entry.local_depth as i64);
            let digits = entry.prefix_string();
            chunk[INT_SIZE..INT_SIZE + digits.len()].copy_from_slice(digits.as_bytes());
            put_i64_le(&mut chunk[entry_size - INT_SIZE..], entry.bucket_ref as i64);
        }
        buf
    }

    /// Parses a whole directory file. The result is not verified.
    pub fn decode(bytes: &[u8], global_depth: u8) -> Result<Self> {
        let entry_size = Self::entry_size(global_depth);
        if bytes.len() % entry_size != 0 {
            return Err(IndexError::CorruptDirectory(format!(
                "{} bytes is not a whole number of {} byte entries",
                bytes.len(),
                entry_size
            )));
        }
        let entries = bytes
            .chunks_exact(entry_size)
            .enumerate()
            .map(|(i, chunk)| decode_entry(i, chunk, global_depth))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            global_depth,
            entries,
        })
    }
}

fn decode_entry(index: usize, chunk: &[u8], global_depth: u8) -> Result<DirectoryEntry> {
    let corrupt = |reason: String| IndexError::CorruptDirectory(format!("entry {}: {}", index, reason));

    let local_depth = get_i64_le(chunk)?;
    if local_depth < 0 || local_depth > global_depth as i64 {
        return Err(corrupt(format!("local depth {} out of range", local_depth)));
    }
    let local_depth = local_depth as u8;

    let digits = &chunk[INT_SIZE..INT_SIZE + global_depth as usize + 1];
    let mut prefix = 0_u64;
    for (position, &c) in digits.iter().enumerate() {
        match (position < local_depth as usize, c) {
            (true, b'0') => prefix <<= 1,
            (true, b'1') => prefix = (prefix << 1) | 1,
            (false, 0) => {}
            _ => return Err(corrupt(format!("bad prefix byte {:#04x} at {}", c, position))),
        }
    }

    let bucket_ref = get_i64_le(&chunk[chunk.len() - INT_SIZE..])?;
    if bucket_ref < 0 {
        return Err(corrupt(format!("negative bucket ref {}", bucket_ref)));
    }
    Ok(DirectoryEntry::new(local_depth, prefix, bucket_ref as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn matching(directory: &Directory, bits: &HashBits) -> usize {
        directory.entries().iter().filter(|e| e.matches(bits)).count()
    }

    fn assert_total(directory: &Directory) {
        let depth = directory.global_depth();
        for value in 0..(1_u64 << depth) {
            assert_eq!(matching(directory, &HashBits::new(value, depth)), 1);
        }
        directory.verify().unwrap();
    }

    #[test]
    fn new_directory_claims_everything() {
        let directory = Directory::new(4, 0);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.entry(0).prefix_string(), "");
        assert_total(&directory);
        assert_eq!(directory.lookup(&HashBits::new(0b1010, 4)).unwrap(), 0);
    }

    #[test]
    fn split_adds_a_bit_above_the_prefix() {
        let mut directory = Directory::new(4, 0);
        let (zero, one) = directory.split(0, [1024, 2048]).unwrap();
        assert_eq!(zero.prefix_string(), "0");
        assert_eq!(one.prefix_string(), "1");
        assert_eq!(directory.lookup(&HashBits::new(0b0110, 4)).unwrap(), 1024);
        assert_eq!(directory.lookup(&HashBits::new(0b0111, 4)).unwrap(), 2048);

        let index = directory.lookup_index(&HashBits::new(0b0001, 4)).unwrap();
        let (zero, one) = directory.split(index, [3072, 4096]).unwrap();
        assert_eq!(zero.prefix_string(), "01");
        assert_eq!(one.prefix_string(), "11");
        assert_eq!(directory.lookup(&HashBits::new(0b0101, 4)).unwrap(), 3072);
        assert_eq!(directory.lookup(&HashBits::new(0b0011, 4)).unwrap(), 4096);
        // untouched sibling keeps its depth and bucket
        assert_eq!(directory.lookup(&HashBits::new(0b1110, 4)).unwrap(), 1024);
        assert_total(&directory);
    }

    #[test]
    fn split_at_global_depth_fails() {
        let mut directory = Directory::new(1, 0);
        directory.split(0, [1, 2]).unwrap();
        let err = directory.split(0, [3, 4]).unwrap_err();
        assert!(matches!(err, IndexError::AddressSpaceExhausted { depth: 1 }));
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn missing_entry_is_a_lookup_inconsistency() {
        let directory = Directory {
            global_depth: 2,
            entries: vec![DirectoryEntry::new(1, 0, 0)],
        };
        let err = directory.lookup(&HashBits::new(0b01, 2)).unwrap_err();
        assert!(matches!(err, IndexError::LookupInconsistency { ref bits } if bits == "01"));
        assert!(directory.verify().is_err());
    }

    #[test]
    fn verify_catches_overlap() {
        let directory = Directory {
            global_depth: 2,
            entries: vec![DirectoryEntry::new(0, 0, 0), DirectoryEntry::new(1, 1, 8)],
        };
        assert!(matches!(directory.verify(), Err(IndexError::CorruptDirectory(_))));
    }

    #[test]
    fn verify_handles_large_directories() {
        let mut directory = Directory::new(24, 0);
        let mut next_ref = 1;
        for _ in 0..17 {
            for index in 0..directory.len() {
                directory.split(index, [next_ref, next_ref + 1]).unwrap();
                next_ref += 2;
            }
        }
        assert_eq!(directory.len(), 1 << 17);
        directory.verify().unwrap();

        let mut gap = directory.clone();
        gap.entries.swap_remove(1000);
        assert!(matches!(gap.verify(), Err(IndexError::CorruptDirectory(_))));

        let mut twice = directory;
        let copy = twice.entry(4321).clone();
        twice.entries.push(copy);
        assert!(matches!(twice.verify(), Err(IndexError::CorruptDirectory(ref m)) if m.contains("overlap")));
    }

    #[test]
    fn verify_at_full_width() {
        let mut directory = Directory::new(64, 0);
        for _ in 0..64 {
            let last = directory.len() - 1;
            directory.split(last, [0, 0]).unwrap();
        }
        assert_eq!(directory.entries().last().unwrap().local_depth(), 64);
        directory.verify().unwrap();
    }

    #[test]
    fn encoded_layout() {
        let mut directory = Directory::new(3, 0);
        directory.split(0, [16, 32]).unwrap();
        let bytes = directory.encode();
        assert_eq!(bytes.len(), 2 * Directory::entry_size(3));
        let second = &bytes[Directory::entry_size(3)..];
        assert_eq!(&second[..8], &1_i64.to_le_bytes());
        assert_eq!(&second[8..12], b"1\0\0\0");
        assert_eq!(&second[12..], &32_i64.to_le_bytes());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Directory::decode(&[0; 5], 3).is_err());

        let mut bytes = Directory::new(3, 0).encode();
        bytes[8] = b'x';
        assert!(matches!(
            Directory::decode(&bytes, 3),
            Err(IndexError::CorruptDirectory(_))
        ));

        let mut bytes = Directory::new(3, 0).encode();
        bytes[0] = 9;
        assert!(Directory::decode(&bytes, 3).is_err());
    }

    proptest! {
        #[test]
        fn random_splits_stay_total(picks in proptest::collection::vec(any::<u64>(), 0..40)) {
            let depth = 6;
            let mut directory = Directory::new(depth, 0);
            let mut next_ref = 1;
            for pick in picks {
                let splittable: Vec<usize> = (0..directory.len())
                    .filter(|&i| directory.entry(i).local_depth() < depth)
                    .collect();
                if splittable.is_empty() {
                    break;
                }
                let index = splittable[(pick % splittable.len() as u64) as usize];
                directory.split(index, [next_ref, next_ref + 1]).unwrap();
                next_ref += 2;
            }
            for value in 0..(1_u64 << depth) {
                prop_assert_eq!(matching(&directory, &HashBits::new(value, depth)), 1);
            }
            prop_assert!(directory.verify().is_ok());

            let reloaded = Directory::decode(&directory.encode(), depth).unwrap();
            for value in 0..(1_u64 << depth) {
                let bits = HashBits::new(value, depth);
                prop_assert_eq!(reloaded.lookup(&bits).unwrap(), directory.lookup(&bits).unwrap());
            }
        }
    }
}
