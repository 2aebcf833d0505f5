use crate::bytes::{DecodeRecord, EncodeRecord, FixedWidth};
use crate::command::{GetCommand, PutCommand};
use crate::config::IndexConfig;
use crate::consts::{KV_KEY_SIZE, KV_VALUE_SIZE};
use crate::dataset::DataFile;
use crate::error::{IndexError, Result as IndexResult};
use crate::index::{ExtendibleHashFile, IndexStats};
use std::cmp::Ordering;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("key is longer than {} bytes", KV_KEY_SIZE)]
    KeyTooLong,
    #[error("value is longer than {} bytes", KV_VALUE_SIZE)]
    ValueTooLong,
    #[error("keys and values cannot contain NUL bytes")]
    NulByte,
    #[error("storage engine has stopped")]
    EngineStopped,
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub type Key = [u8; KV_KEY_SIZE];

/// The record stored in the database
///
/// ## Binary representation
///
/// - `KV_KEY_SIZE` bytes of key, NUL padded
/// - `KV_VALUE_SIZE` bytes of value, NUL padded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvRecord {
    key: Key,
    value: [u8; KV_VALUE_SIZE],
}

fn pad<const N: usize>(text: &str, too_long: StorageError) -> Result<[u8; N]> {
    let bytes = text.as_bytes();
    if bytes.contains(&0) {
        return Err(StorageError::NulByte);
    }
    if bytes.len() > N {
        return Err(too_long);
    }
    let mut out = [0_u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn unpad(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl KvRecord {
    pub fn new(key: &str, value: &str) -> Result<Self> {
        Ok(Self {
            key: encode_key(key)?,
            value: pad(value, StorageError::ValueTooLong)?,
        })
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn key_str(&self) -> String {
        unpad(&self.key)
    }

    pub fn value_str(&self) -> String {
        unpad(&self.value)
    }
}

pub fn encode_key(key: &str) -> Result<Key> {
    pad(key, StorageError::KeyTooLong)
}

impl FixedWidth for KvRecord {
    const WIDTH: usize = KV_KEY_SIZE + KV_VALUE_SIZE;
}

impl EncodeRecord for KvRecord {
    fn encode_into(&self, buf: &mut [u8]) {
        (self.key, self.value).encode_into(buf);
    }
}

impl DecodeRecord for KvRecord {
    fn decode_from(buf: &[u8]) -> IndexResult<Self> {
        let (key, value) = <(Key, [u8; KV_VALUE_SIZE])>::decode_from(buf)?;
        Ok(Self { key, value })
    }
}

pub type KeyFn = fn(&KvRecord) -> Key;
pub type CompareFn = fn(&Key, &Key) -> Ordering;
pub type KvIndex = ExtendibleHashFile<KvRecord, Key, KeyFn, CompareFn>;

fn record_key(record: &KvRecord) -> Key {
    record.key
}

/// Key/value storage: the data file is the source of truth, the extendible
/// hash file a primary index over it.
pub struct StorageEngine {
    data: DataFile<KvRecord>,
    index: KvIndex,
}

impl StorageEngine {
    /// Opens (or builds) the index first so a refused index leaves the data file alone.
    pub fn open(config: IndexConfig) -> Result<Self> {
        let config = config.with_primary_key(true);
        let dataset = config.dataset().to_path_buf();
        let index = KvIndex::open_with(
            config,
            record_key as KeyFn,
            <Key as Ord>::cmp as CompareFn,
            Default::default(),
        )?;
        let data = DataFile::open(dataset)?;
        Ok(Self { data, index })
    }

    /// Stores a new key. Existing keys are not overwritten.
    ///
    /// The index takes the record first, so a refused or failed insert leaves
    /// the data file untouched. If the data append then fails the index holds
    /// a record the data file lacks until the index is next rebuilt.
    pub fn put(&mut self, cmd: PutCommand) -> Result<()> {
        let PutCommand(key, value) = cmd;
        let record = KvRecord::new(&key, &value)?;
        self.index.insert(record.clone())?;
        self.data.append(&record)?;
        Ok(())
    }

    pub fn get(&mut self, cmd: &GetCommand) -> Result<Option<String>> {
        let key = encode_key(&cmd.0)?;
        Ok(self
            .index
            .search(&key)?
            .first()
            .map(KvRecord::value_str))
    }

    pub fn stats(&mut self) -> Result<IndexStats> {
        Ok(self.index.stats()?)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.data.sync()?;
        self.index.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.data.sync()?;
        self.index.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> IndexConfig {
        IndexConfig::new(dir.path().join("kv.db")).with_block_size(512)
    }

    #[test]
    fn record_padding() {
        let record = KvRecord::new("name", "ferris").unwrap();
        assert_eq!(record.key_str(), "name");
        assert_eq!(record.value_str(), "ferris");
        let mut buf = vec![0_u8; KvRecord::WIDTH];
        record.encode_into(&mut buf);
        assert_eq!(&buf[..4], b"name");
        assert_eq!(KvRecord::decode_from(&buf).unwrap(), record);

        assert!(matches!(
            KvRecord::new(&"k".repeat(33), "v"),
            Err(StorageError::KeyTooLong)
        ));
        assert!(matches!(
            KvRecord::new("k", &"v".repeat(97)),
            Err(StorageError::ValueTooLong)
        ));
        assert!(matches!(KvRecord::new("a\0b", "v"), Err(StorageError::NulByte)));
    }

    #[test]
    fn put_get_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut storage = StorageEngine::open(config(&dir)).unwrap();
        for i in 0..50 {
            storage
                .put(PutCommand(format!("key{}", i), format!("value{}", i)))
                .unwrap();
        }
        assert!(matches!(
            storage.put(PutCommand("key3".into(), "other".into())),
            Err(StorageError::Index(IndexError::DuplicateKey))
        ));
        assert_eq!(storage.data.len().unwrap(), 50);
        assert_eq!(
            storage.get(&GetCommand("key7".into())).unwrap(),
            Some("value7".to_string())
        );
        storage.close().unwrap();

        let mut storage = StorageEngine::open(config(&dir)).unwrap();
        assert_eq!(storage.stats().unwrap().records, 50);
        assert_eq!(
            storage.get(&GetCommand("key49".into())).unwrap(),
            Some("value49".to_string())
        );
        assert_eq!(storage.get(&GetCommand("missing".into())).unwrap(), None);
    }

    #[test]
    fn index_is_rebuilt_from_data_file() {
        let dir = TempDir::new().unwrap();
        let mut storage = StorageEngine::open(config(&dir)).unwrap();
        for i in 0..10 {
            storage
                .put(PutCommand(format!("k{}", i), format!("v{}", i)))
                .unwrap();
        }
        storage.close().unwrap();

        let config = config(&dir);
        std::fs::remove_file(config.bucket_path()).unwrap();
        std::fs::remove_file(config.directory_path()).unwrap();

        let mut storage = StorageEngine::open(config).unwrap();
        assert_eq!(storage.stats().unwrap().records, 10);
        assert_eq!(
            storage.get(&GetCommand("k4".into())).unwrap(),
            Some("v4".to_string())
        );
    }
}
