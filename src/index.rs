//! Extendible hash index over a file of fixed-width records.
//!
//! Three files sit next to the dataset:
//! 1. `<dataset>.ehash`, the bucket file (see [`Bucket`](crate::bucket::Bucket))
//! 2. `<dataset>_index.ehashind`, the directory file (see [`Directory`])
//! 3. `<dataset>_index.ehashhdr`, the settings the index was built with (see
//!    [`IndexHeader`])
//!
//! The directory is read whole on open and written whole on [`flush`] and
//! close. Between those points only the bucket file is kept up to date, so a
//! crash loses every split made since the last flush.
//!
//! [`flush`]: ExtendibleHashFile::flush

use crate::bucket::{Bucket, BucketStore};
use crate::bytes::{EncodeRecord, FixedRecord};
use crate::config::IndexConfig;
use crate::dataset::Records;
use crate::directory::Directory;
use crate::error::{IndexError, Result};
use crate::hasher::{HashBits, KeyHasher, XxKeyHasher};
use crate::header::IndexHeader;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Counters describing the shape of an open index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Directory entries.
    pub entries: usize,
    /// Deepest local depth of any entry.
    pub max_local_depth: u8,
    /// Blocks in the bucket file, referenced or not.
    pub blocks: u64,
    /// Blocks reachable from the directory, overflow buckets included.
    pub live_buckets: usize,
    /// Overflow buckets hanging off a directory bucket.
    pub overflow_buckets: usize,
    /// Records reachable from the directory.
    pub records: usize,
}

/// A disk-backed extendible hash index.
///
/// `extract` pulls the key out of a record and `compare` decides whether two
/// keys are equal (`Ordering::Equal`). Keys are turned into addresses by `H`.
pub struct ExtendibleHashFile<R, K, E, C, H = XxKeyHasher> {
    config: IndexConfig,
    directory: Directory,
    buckets: BucketStore<R>,
    extract: E,
    compare: C,
    hasher: H,
    closed: bool,
    _key: PhantomData<fn() -> K>,
}

impl<R, K, E, C> ExtendibleHashFile<R, K, E, C, XxKeyHasher>
where
    R: FixedRecord,
    K: EncodeRecord,
    E: Fn(&R) -> K,
    C: Fn(&K, &K) -> Ordering,
{
    /// Opens the index for the dataset at `dataset` with the default block size,
    /// global depth and hasher, building it from the dataset if it doesn't exist.
    pub fn open<P: Into<PathBuf>>(
        dataset: P,
        primary_key: bool,
        extract: E,
        compare: C,
    ) -> Result<Self> {
        let config = IndexConfig::new(dataset).with_primary_key(primary_key);
        Self::open_with(config, extract, compare, XxKeyHasher)
    }
}

impl<R, K, E, C, H> ExtendibleHashFile<R, K, E, C, H>
where
    R: FixedRecord,
    E: Fn(&R) -> K,
    C: Fn(&K, &K) -> Ordering,
    H: KeyHasher<K>,
{
    /// Opens the index described by `config`.
    ///
    /// - Neither file has content: a new index is built by replaying every
    ///   record of the dataset.
    /// - Both have content: the directory is loaded, once the header shows the
    ///   index was built with the block size, global depth and record width
    ///   of `config`. A mismatch is [`IndexError::InvalidConfig`].
    /// - Only one has content: [`IndexError::StructuralCorruption`]. No file is
    ///   created or modified in that case.
    pub fn open_with(config: IndexConfig, extract: E, compare: C, hasher: H) -> Result<Self> {
        let capacity = config.validate(R::WIDTH)?;
        let directory_path = config.directory_path();
        let bucket_path = config.bucket_path();
        let directory_bytes = existing_len(&directory_path)?;
        let bucket_bytes = existing_len(&bucket_path)?;

        let (directory, buckets, fresh) = match (directory_bytes, bucket_bytes) {
            (0, 0) => {
                let mut buckets = BucketStore::open(&bucket_path, config.block_size, capacity)?;
                let root = buckets.allocate()?;
                (Directory::new(config.global_depth, root), buckets, true)
            }
            (d, b) if d > 0 && b > 0 => {
                check_header(&config, R::WIDTH)?;
                let directory = load_directory(&config, &directory_path, b)?;
                let buckets = BucketStore::open(&bucket_path, config.block_size, capacity)?;
                (directory, buckets, false)
            }
            (d, b) => {
                warn!(
                    directory = %directory_path.display(),
                    bucket = %bucket_path.display(),
                    directory_bytes = d,
                    bucket_bytes = b,
                    "refusing to open index with one empty file"
                );
                return Err(IndexError::StructuralCorruption {
                    directory_bytes: d,
                    bucket_bytes: b,
                });
            }
        };

        let mut index = Self {
            config,
            directory,
            buckets,
            extract,
            compare,
            hasher,
            closed: false,
            _key: PhantomData,
        };

        if fresh {
            if let Err(e) = index.rebuild() {
                // leave nothing behind that a later open would mistake for an index
                index.closed = true;
                let _ = fs::remove_file(&bucket_path);
                let _ = fs::remove_file(&directory_path);
                let _ = fs::remove_file(index.config.header_path());
                return Err(e);
            }
        } else {
            info!(
                dataset = %index.config.dataset.display(),
                entries = index.directory.len(),
                "loaded index"
            );
        }
        Ok(index)
    }

    /// Replays the dataset through `insert` and writes the header and the
    /// first directory.
    fn rebuild(&mut self) -> Result<()> {
        IndexHeader::new(&self.config, R::WIDTH).write(&self.config.header_path())?;
        let mut replayed = 0_usize;
        let mut skipped = 0_usize;
        for record in Records::<R>::open(&self.config.dataset)? {
            match self.insert(record?) {
                Ok(()) => replayed += 1,
                Err(IndexError::DuplicateKey) => skipped += 1,
                Err(e) => return Err(e),
            }
        }
        if skipped > 0 {
            warn!(skipped, "dataset holds records with repeated primary keys, kept the first of each");
        }
        self.flush()?;
        info!(
            dataset = %self.config.dataset.display(),
            records = replayed,
            entries = self.directory.len(),
            "built index"
        );
        Ok(())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Records per bucket block.
    pub fn capacity(&self) -> usize {
        self.buckets.capacity()
    }

    pub fn is_primary_key(&self) -> bool {
        self.config.primary_key
    }

    fn bits_of(&self, key: &K) -> HashBits {
        HashBits::new(self.hasher.hash_key(key), self.config.global_depth)
    }

    fn key_matches(&self, record: &R, key: &K) -> bool {
        (self.compare)(&(self.extract)(record), key) == Ordering::Equal
    }

    /// Every record whose key equals `key`. A primary index stops at the first.
    pub fn search(&mut self, key: &K) -> Result<Vec<R>> {
        let bits = self.bits_of(key);
        let bucket_ref = self.directory.lookup(&bits)?;
        let mut found = Vec::new();
        for (_, bucket) in self.buckets.read_chain(bucket_ref)? {
            for record in bucket.into_records() {
                if self.key_matches(&record, key) {
                    found.push(record);
                    if self.config.primary_key {
                        return Ok(found);
                    }
                }
            }
        }
        Ok(found)
    }

    pub fn contains(&mut self, key: &K) -> Result<bool> {
        Ok(!self.search(key)?.is_empty())
    }

    /// Adds `record` to the index, splitting full buckets as needed.
    ///
    /// A primary index refuses a record whose key is already present with
    /// [`IndexError::DuplicateKey`], before touching any bucket.
    pub fn insert(&mut self, record: R) -> Result<()> {
        let key = (self.extract)(&record);
        if self.config.primary_key && !self.search(&key)?.is_empty() {
            return Err(IndexError::DuplicateKey);
        }
        let bits = self.bits_of(&key);
        loop {
            let position = self.directory.lookup_index(&bits)?;
            let entry = self.directory.entry(position).clone();
            if self.buckets.append(entry.bucket_ref(), &record)? {
                return Ok(());
            }
            if entry.local_depth() < self.config.global_depth {
                self.split(position)?;
                continue;
            }
            // every hash bit is in use: the colliding records can only be chained
            self.buckets.append_to_chain(entry.bucket_ref(), &record)?;
            return Ok(());
        }
    }

    /// Moves the records of the entry at `position` into two fresh buckets
    /// by the bit at its local depth, then swaps the entry for its children.
    fn split(&mut self, position: usize) -> Result<()> {
        let entry = self.directory.entry(position).clone();
        if entry.local_depth() >= self.config.global_depth {
            return Err(IndexError::AddressSpaceExhausted {
                depth: entry.local_depth(),
            });
        }
        let capacity = self.buckets.capacity();
        let old = self.buckets.read(entry.bucket_ref())?;

        let mut children: [Bucket<R>; 2] = [Bucket::default(), Bucket::default()];
        for record in old.into_records() {
            let bits = self.bits_of(&(self.extract)(&record));
            let side = usize::from(bits.bit(entry.local_depth()));
            if children[side].push(record, capacity).is_err() {
                return Err(IndexError::CorruptBucket {
                    offset: entry.bucket_ref(),
                    reason: "bucket holds more records than its capacity".into(),
                });
            }
        }

        let zero_ref = self.buckets.allocate()?;
        let one_ref = self.buckets.allocate()?;
        self.buckets.write(zero_ref, &children[0])?;
        self.buckets.write(one_ref, &children[1])?;
        self.directory.split(position, [zero_ref, one_ref])?;
        debug!(
            zero = children[0].len(),
            one = children[1].len(),
            "redistributed split bucket"
        );
        Ok(())
    }

    /// Distinct head buckets of the directory.
    fn head_buckets(&self) -> BTreeSet<u64> {
        self.directory
            .entries()
            .iter()
            .map(|entry| entry.bucket_ref())
            .collect()
    }

    /// Number of records reachable through the directory.
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.stats()?.records)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&mut self) -> Result<IndexStats> {
        let mut stats = IndexStats {
            entries: self.directory.len(),
            max_local_depth: self.directory.max_local_depth(),
            blocks: self.buckets.block_count()?,
            ..IndexStats::default()
        };
        for head in self.head_buckets() {
            let chain = self.buckets.read_chain(head)?;
            stats.live_buckets += chain.len();
            stats.overflow_buckets += chain.len() - 1;
            stats.records += chain.iter().map(|(_, bucket)| bucket.len()).sum::<usize>();
        }
        Ok(stats)
    }

    /// Writes the directory file, replacing what was there, and syncs the
    /// bucket file.
    pub fn flush(&mut self) -> Result<()> {
        self.buckets.sync()?;
        write_directory(&self.config.directory_path(), &self.directory)?;
        debug!(entries = self.directory.len(), "flushed directory");
        Ok(())
    }

    /// Flushes and closes the index.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        info!(dataset = %self.config.dataset.display(), "closed index");
        Ok(())
    }
}

impl<R, K, E, C, H> Drop for ExtendibleHashFile<R, K, E, C, H> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = write_directory(&self.config.directory_path(), &self.directory) {
            error!(error = %e, dataset = %self.config.dataset.display(), "failed to flush directory on drop");
        }
    }
}

/// Length of the file at `path`, 0 if it does not exist.
fn existing_len(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Refuses to load an index built with other settings than `config`.
fn check_header(config: &IndexConfig, record_width: usize) -> Result<()> {
    let path = config.header_path();
    match IndexHeader::load(&path)? {
        Some(header) => header.check(config, record_width),
        None => Err(IndexError::CorruptHeader(format!(
            "{} is missing",
            path.display()
        ))),
    }
}

fn load_directory(config: &IndexConfig, path: &Path, bucket_bytes: u64) -> Result<Directory> {
    let block_size = config.block_size as u64;
    if bucket_bytes % block_size != 0 {
        return Err(IndexError::CorruptBucket {
            offset: bucket_bytes - bucket_bytes % block_size,
            reason: format!(
                "file length {} is not a whole number of {} byte blocks",
                bucket_bytes, block_size
            ),
        });
    }
    let bytes = fs::read(path)?;
    let directory = Directory::decode(&bytes, config.global_depth)?;
    directory.verify()?;
    if let Some(entry) = directory
        .entries()
        .iter()
        .find(|entry| entry.bucket_ref() % block_size != 0 || entry.bucket_ref() >= bucket_bytes)
    {
        return Err(IndexError::CorruptDirectory(format!(
            "entry '{}' points at offset {} outside the bucket file",
            entry.prefix_string(),
            entry.bucket_ref()
        )));
    }
    Ok(directory)
}

fn write_directory(path: &Path, directory: &Directory) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&directory.encode())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type Row = (u64, u64);

    fn key_of(row: &Row) -> u64 {
        row.0
    }

    fn config(dir: &TempDir, capacity: usize, depth: u8) -> IndexConfig {
        IndexConfig::new(dir.path().join("rows.dat"))
            .with_block_size(16 + capacity * 16)
            .with_global_depth(depth)
    }

    fn open_identity(
        config: IndexConfig,
    ) -> ExtendibleHashFile<Row, u64, fn(&Row) -> u64, fn(&u64, &u64) -> Ordering, fn(&u64) -> u64>
    {
        ExtendibleHashFile::open_with(
            config,
            key_of as fn(&Row) -> u64,
            u64::cmp as fn(&u64, &u64) -> Ordering,
            (|k: &u64| *k) as fn(&u64) -> u64,
        )
        .unwrap()
    }

    #[test]
    fn fresh_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut index = open_identity(config(&dir, 2, 4));
        assert!(index.search(&7).unwrap().is_empty());
        assert!(index.is_empty().unwrap());
        assert_eq!(index.directory().len(), 1);
    }

    #[test]
    fn split_keeps_every_record() {
        let dir = TempDir::new().unwrap();
        let mut index = open_identity(config(&dir, 2, 4));
        index.insert((0b0000, 1)).unwrap();
        index.insert((0b0001, 2)).unwrap();
        let before: Vec<Row> = index.buckets.read(0).unwrap().into_records();
        index.insert((0b0010, 3)).unwrap();

        let mut after: Vec<Row> = Vec::new();
        for entry in index.directory().entries().to_vec() {
            after.extend(index.buckets.read(entry.bucket_ref()).unwrap().into_records());
        }
        let mut expected = before;
        expected.push((0b0010, 3));
        expected.sort();
        after.sort();
        assert_eq!(after, expected);
        // the split root block is no longer referenced
        assert!(index.directory().entries().iter().all(|e| e.bucket_ref() != 0));
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut index = open_identity(config(&dir, 2, 4));
        index.insert((5, 50)).unwrap();
        assert!(matches!(index.insert((5, 51)), Err(IndexError::DuplicateKey)));
        assert_eq!(index.search(&5).unwrap(), vec![(5, 50)]);
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn collisions_at_full_depth_chain() {
        let dir = TempDir::new().unwrap();
        let mut index = open_identity(config(&dir, 1, 2).with_primary_key(false));
        for value in 0..4 {
            index.insert((0b10, value)).unwrap();
        }
        let mut found = index.search(&0b10).unwrap();
        found.sort();
        assert_eq!(found, vec![(2, 0), (2, 1), (2, 2), (2, 3)]);
        let stats = index.stats().unwrap();
        assert_eq!(stats.max_local_depth, 2);
        assert_eq!(stats.overflow_buckets, 3);
        assert_eq!(stats.records, 4);
        index.directory().verify().unwrap();
    }

    #[test]
    fn drop_flushes_directory() {
        let dir = TempDir::new().unwrap();
        {
            let mut index = open_identity(config(&dir, 2, 8));
            for k in 0..20 {
                index.insert((k, k * 10)).unwrap();
            }
        }
        let mut index = open_identity(config(&dir, 2, 8));
        assert_eq!(index.len().unwrap(), 20);
        assert_eq!(index.search(&13).unwrap(), vec![(13, 130)]);
    }
}
