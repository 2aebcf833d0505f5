//! Fixed-size bucket blocks in the `.ehash` file.

use crate::bytes::{get_i64_le, put_i64_le, FixedRecord};
use crate::consts::{INT_SIZE, NO_OVERFLOW};
use crate::error::{IndexError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

/// Rust representation of a bucket
///
/// ## Binary layout
///
/// - First 8 bytes are the record count as an i64 LE
/// - Followed by `capacity` record slots of `R::WIDTH` bytes, the first `count` in use
/// - Then the offset of the next bucket in the overflow chain as an i64 LE, `-1` for none
/// - Zero padding up to the block size
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket<R> {
    records: Vec<R>,
    overflow: Option<u64>,
}

impl<R> Default for Bucket<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            overflow: None,
        }
    }
}

impl<R: FixedRecord> Bucket<R> {
    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn overflow(&self) -> Option<u64> {
        self.overflow
    }

    pub fn set_overflow(&mut self, next: Option<u64>) {
        self.overflow = next;
    }

    /// Puts `record` in the first free slot. Hands it back if the bucket is full.
    pub fn push(&mut self, record: R, capacity: usize) -> std::result::Result<(), R> {
        if self.records.len() >= capacity {
            return Err(record);
        }
        self.records.push(record);
        Ok(())
    }

    fn encode(&self, capacity: usize, block_size: usize) -> Vec<u8> {
        let mut buf = vec![0_u8; block_size];
        put_i64_le(&mut buf, self.records.len() as i64);
        for (record, slot) in self.records.iter().zip(buf[INT_SIZE..].chunks_exact_mut(R::WIDTH)) {
            record.encode_into(slot);
        }
        let overflow_at = INT_SIZE + capacity * R::WIDTH;
        put_i64_le(
            &mut buf[overflow_at..],
            self.overflow.map_or(NO_OVERFLOW, |next| next as i64),
        );
        buf
    }

    fn decode(buf: &[u8], offset: u64, capacity: usize) -> Result<Self> {
        let corrupt = |reason: String| IndexError::CorruptBucket { offset, reason };

        let count = get_i64_le(buf)?;
        if count < 0 || count as usize > capacity {
            return Err(corrupt(format!("count {} outside 0..={}", count, capacity)));
        }
        let records = buf[INT_SIZE..]
            .chunks_exact(R::WIDTH)
            .take(count as usize)
            .map(R::decode_from)
            .collect::<Result<Vec<_>>>()?;

        let overflow = match get_i64_le(&buf[INT_SIZE + capacity * R::WIDTH..])? {
            NO_OVERFLOW => None,
            next if next >= 0 => Some(next as u64),
            next => return Err(corrupt(format!("bad overflow link {}", next))),
        };
        Ok(Self { records, overflow })
    }
}

/// The bucket file. Holds nothing in memory but the file handle, every read
/// and write goes to disk.
pub struct BucketStore<R> {
    file: File,
    block_size: usize,
    capacity: usize,
    _record: PhantomData<R>,
}

impl<R: FixedRecord> BucketStore<R> {
    /// Opens (creating if needed) the bucket file at `path`.
    pub fn open(path: &Path, block_size: usize, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            block_size,
            capacity,
            _record: PhantomData,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks in the file, including blocks no entry points at any more.
    pub fn block_count(&self) -> Result<u64> {
        Ok(self.file_len()? / self.block_size as u64)
    }

    fn file_len(&self) -> Result<u64> {
        let len = self.file.metadata()?.len();
        if len % self.block_size as u64 != 0 {
            return Err(IndexError::CorruptBucket {
                offset: len - len % self.block_size as u64,
                reason: format!("file length {} is not a whole number of blocks", len),
            });
        }
        Ok(len)
    }

    pub fn read(&mut self, bucket_ref: u64) -> Result<Bucket<R>> {
        if bucket_ref % self.block_size as u64 != 0 || bucket_ref >= self.file_len()? {
            return Err(IndexError::CorruptBucket {
                offset: bucket_ref,
                reason: "not the start of a block in the bucket file".into(),
            });
        }
        let mut buf = vec![0_u8; self.block_size];
        self.file.seek(SeekFrom::Start(bucket_ref))?;
        self.file.read_exact(&mut buf)?;
        Bucket::decode(&buf, bucket_ref, self.capacity)
    }

    pub fn write(&mut self, bucket_ref: u64, bucket: &Bucket<R>) -> Result<()> {
        let buf = bucket.encode(self.capacity, self.block_size);
        self.file.seek(SeekFrom::Start(bucket_ref))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Extends the file by one empty block and returns its offset.
    pub fn allocate(&mut self) -> Result<u64> {
        let bucket_ref = self.file_len()?;
        self.write(bucket_ref, &Bucket::default())?;
        debug!(bucket_ref, "allocated bucket");
        Ok(bucket_ref)
    }

    /// Adds `record` to the bucket at `bucket_ref` if it has a free slot.
    /// Returns `false` and leaves the block untouched when it is full.
    pub fn append(&mut self, bucket_ref: u64, record: &R) -> Result<bool> {
        let mut bucket = self.read(bucket_ref)?;
        if bucket.push(record.clone(), self.capacity).is_err() {
            return Ok(false);
        }
        self.write(bucket_ref, &bucket)?;
        Ok(true)
    }

    /// Every bucket reachable from `bucket_ref` through overflow links, head first.
    pub fn read_chain(&mut self, bucket_ref: u64) -> Result<Vec<(u64, Bucket<R>)>> {
        let limit = self.block_count()?;
        let mut chain = Vec::new();
        let mut next = Some(bucket_ref);
        while let Some(current) = next {
            if chain.len() as u64 >= limit {
                return Err(IndexError::CorruptBucket {
                    offset: bucket_ref,
                    reason: "overflow chain loops".into(),
                });
            }
            let bucket = self.read(current)?;
            next = bucket.overflow();
            chain.push((current, bucket));
        }
        Ok(chain)
    }

    /// Appends `record` to the first bucket of the chain at `bucket_ref` with
    /// room, linking a new block onto the tail if every bucket is full.
    pub fn append_to_chain(&mut self, bucket_ref: u64, record: &R) -> Result<u64> {
        let chain = self.read_chain(bucket_ref)?;
        let capacity = self.capacity;
        for (current, _) in chain.iter().filter(|(_, b)| b.len() < capacity) {
            if self.append(*current, record)? {
                return Ok(*current);
            }
        }
        let (tail_ref, mut tail) = chain
            .into_iter()
            .last()
            .ok_or_else(|| IndexError::CorruptBucket {
                offset: bucket_ref,
                reason: "empty chain".into(),
            })?;
        let new_ref = self.allocate()?;
        let mut fresh = Bucket::default();
        // a fresh block always has a free slot
        let _ = fresh.push(record.clone(), self.capacity);
        self.write(new_ref, &fresh)?;
        tail.set_overflow(Some(new_ref));
        self.write(tail_ref, &tail)?;
        debug!(head = bucket_ref, tail = tail_ref, new_ref, "chained overflow bucket");
        Ok(new_ref)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, capacity: usize) -> BucketStore<u64> {
        let block_size = 2 * INT_SIZE + capacity * 8;
        BucketStore::open(&dir.path().join("b.ehash"), block_size, capacity).unwrap()
    }

    #[test]
    fn allocate_appends_blocks() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir, 2);
        assert_eq!(store.allocate().unwrap(), 0);
        assert_eq!(store.allocate().unwrap(), 32);
        assert_eq!(store.block_count().unwrap(), 2);
        let bucket = store.read(32).unwrap();
        assert!(bucket.is_empty());
        assert_eq!(bucket.overflow(), None);
    }

    #[test]
    fn append_until_full() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir, 2);
        let bucket_ref = store.allocate().unwrap();
        assert!(store.append(bucket_ref, &10).unwrap());
        assert!(store.append(bucket_ref, &11).unwrap());
        assert!(!store.append(bucket_ref, &12).unwrap());
        assert_eq!(store.read(bucket_ref).unwrap().records(), &[10, 11]);
    }

    #[test]
    fn block_layout_on_disk() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir, 2);
        let bucket_ref = store.allocate().unwrap();
        store.append(bucket_ref, &7).unwrap();
        let bytes = std::fs::read(dir.path().join("b.ehash")).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..8], &1_i64.to_le_bytes());
        assert_eq!(&bytes[8..16], &7_u64.to_le_bytes());
        assert_eq!(&bytes[24..32], &(-1_i64).to_le_bytes());
    }

    #[test]
    fn chain_grows_when_full() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir, 1);
        let head = store.allocate().unwrap();
        assert_eq!(store.append_to_chain(head, &1).unwrap(), head);
        let second = store.append_to_chain(head, &2).unwrap();
        assert_ne!(second, head);
        let third = store.append_to_chain(head, &3).unwrap();
        let chain = store.read_chain(head).unwrap();
        let refs: Vec<u64> = chain.iter().map(|(r, _)| *r).collect();
        assert_eq!(refs, vec![head, second, third]);
        let records: Vec<u64> = chain.into_iter().flat_map(|(_, b)| b.into_records()).collect();
        assert_eq!(records, vec![1, 2, 3]);
    }

    #[test]
    fn corrupt_blocks_are_reported() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir, 2);
        let bucket_ref = store.allocate().unwrap();
        assert!(matches!(store.read(8), Err(IndexError::CorruptBucket { .. })));
        assert!(matches!(store.read(64), Err(IndexError::CorruptBucket { .. })));

        let path = dir.path().join("b.ehash");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[..8].copy_from_slice(&5_i64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            store.read(bucket_ref),
            Err(IndexError::CorruptBucket { offset: 0, .. })
        ));
    }

    #[test]
    fn overflow_loop_is_detected() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir, 1);
        let head = store.allocate().unwrap();
        let mut bucket = Bucket::default();
        bucket.set_overflow(Some(head));
        store.write(head, &bucket).unwrap();
        assert!(store.read_chain(head).is_err());
    }
}
