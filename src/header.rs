//! Settings an index was built with, kept in `<dataset>_index.ehashhdr`.
//!
//! Neither the bucket file nor the directory file records the block size, the
//! global depth or the record width, and reading them with other values
//! misplaces every block and entry. The header pins all three when the index
//! is built and open refuses a config that disagrees.
//!
//! ## Layout
//! `HEADER_SIZE` bytes, integers little endian:
//! - type id, the 8 bytes `ehash.hd`
//! - version as an i64
//! - block size as an i64
//! - global depth as an i64
//! - record width as an i64

use crate::bytes::{get_i64_le, put_i64_le};
use crate::config::IndexConfig;
use crate::consts::{INT_SIZE, MAX_GLOBAL_DEPTH};
use crate::error::{IndexError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

pub const HEADER_TYPE_ID: &[u8; TYPE_ID_SIZE] = b"ehash.hd";
pub const HEADER_VERSION: i64 = 1;
pub const HEADER_SIZE: usize = TYPE_ID_SIZE + 4 * INT_SIZE;

const TYPE_ID_SIZE: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexHeader {
    block_size: u64,
    global_depth: u8,
    record_width: u64,
}

impl IndexHeader {
    pub fn new(config: &IndexConfig, record_width: usize) -> Self {
        Self {
            block_size: config.block_size() as u64,
            global_depth: config.global_depth(),
            record_width: record_width as u64,
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn global_depth(&self) -> u8 {
        self.global_depth
    }

    pub fn record_width(&self) -> u64 {
        self.record_width
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buffer = [0_u8; HEADER_SIZE];
        let mut pos = TYPE_ID_SIZE;
        buffer[..pos].copy_from_slice(HEADER_TYPE_ID);
        for value in [
            HEADER_VERSION,
            self.block_size as i64,
            self.global_depth as i64,
            self.record_width as i64,
        ] {
            put_i64_le(&mut buffer[pos..], value);
            pos += INT_SIZE;
        }
        buffer
    }

    pub fn decode(buffer: &[u8]) -> Result<Self> {
        if buffer.len() != HEADER_SIZE {
            return Err(IndexError::CorruptHeader(format!(
                "expected {} bytes, got {}",
                HEADER_SIZE,
                buffer.len()
            )));
        }
        let mut pos = TYPE_ID_SIZE;
        if &buffer[..pos] != HEADER_TYPE_ID {
            return Err(IndexError::CorruptHeader("not an index header".into()));
        }
        let mut next = || {
            let value = get_i64_le(&buffer[pos..]);
            pos += INT_SIZE;
            value
        };
        let version = next()?;
        let block_size = next()?;
        let global_depth = next()?;
        let record_width = next()?;

        if version != HEADER_VERSION {
            return Err(IndexError::CorruptHeader(format!(
                "unsupported version {}",
                version
            )));
        }
        if block_size <= 0 || record_width <= 0 {
            return Err(IndexError::CorruptHeader(format!(
                "block size {} and record width {} must be positive",
                block_size, record_width
            )));
        }
        if global_depth < 1 || global_depth > MAX_GLOBAL_DEPTH as i64 {
            return Err(IndexError::CorruptHeader(format!(
                "global depth {} out of range",
                global_depth
            )));
        }
        Ok(Self {
            block_size: block_size as u64,
            global_depth: global_depth as u8,
            record_width: record_width as u64,
        })
    }

    /// Reads the header at `path`. `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(buffer) => Self::decode(&buffer).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the header to `path`, replacing what was there.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        Ok(())
    }

    /// Fails with [`IndexError::InvalidConfig`] naming the first setting of
    /// `config` that differs from the ones the index was built with.
    pub fn check(&self, config: &IndexConfig, record_width: usize) -> Result<()> {
        let requested = Self::new(config, record_width);
        let mismatch = |setting: &str, built: u64, opened: u64| {
            IndexError::InvalidConfig(format!(
                "index was built with {} {}, opened with {}",
                setting, built, opened
            ))
        };
        if requested.block_size != self.block_size {
            return Err(mismatch("block size", self.block_size, requested.block_size));
        }
        if requested.global_depth != self.global_depth {
            return Err(mismatch(
                "global depth",
                self.global_depth as u64,
                requested.global_depth as u64,
            ));
        }
        if requested.record_width != self.record_width {
            return Err(mismatch(
                "record width",
                self.record_width,
                requested.record_width,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> IndexConfig {
        IndexConfig::new("rows.dat")
            .with_block_size(512)
            .with_global_depth(20)
    }

    #[test]
    fn header_layout() {
        let bytes = IndexHeader::new(&config(), 24).encode();
        assert_eq!(&bytes[..8], b"ehash.hd");
        assert_eq!(&bytes[8..16], &1_i64.to_le_bytes());
        assert_eq!(&bytes[16..24], &512_i64.to_le_bytes());
        assert_eq!(&bytes[24..32], &20_i64.to_le_bytes());
        assert_eq!(&bytes[32..], &24_i64.to_le_bytes());

        let header = IndexHeader::decode(&bytes).unwrap();
        assert_eq!(header.block_size(), 512);
        assert_eq!(header.global_depth(), 20);
        assert_eq!(header.record_width(), 24);
    }

    #[test]
    fn decode_rejects_garbage() {
        let good = IndexHeader::new(&config(), 24).encode();
        assert!(matches!(
            IndexHeader::decode(&good[..HEADER_SIZE - 1]),
            Err(IndexError::CorruptHeader(_))
        ));

        let mut bytes = good;
        bytes[0] = b'x';
        assert!(IndexHeader::decode(&bytes).is_err());

        let mut bytes = good;
        bytes[8] = 2;
        assert!(IndexHeader::decode(&bytes).is_err());

        let mut bytes = good;
        bytes[24] = 65;
        assert!(IndexHeader::decode(&bytes).is_err());
    }

    #[test]
    fn check_names_the_differing_setting() {
        let header = IndexHeader::new(&config(), 24);
        header.check(&config(), 24).unwrap();

        let err = header.check(&config().with_block_size(256), 24).unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(ref m) if m.contains("block size 512")));
        let err = header.check(&config().with_global_depth(16), 24).unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(ref m) if m.contains("global depth 20")));
        let err = header.check(&config(), 16).unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(ref m) if m.contains("record width 24")));
    }

    #[test]
    fn load_and_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.dat_index.ehashhdr");
        assert_eq!(IndexHeader::load(&path).unwrap(), None);

        let header = IndexHeader::new(&config(), 24);
        header.write(&path).unwrap();
        assert_eq!(IndexHeader::load(&path).unwrap(), Some(header));
    }
}
