//! Configuration used to open an [`ExtendibleHashFile`](crate::index::ExtendibleHashFile).

use crate::consts::*;
use crate::error::{IndexError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Settings for one index over one dataset.
///
/// The index files are named after the dataset path: `<dataset>.ehash`,
/// `<dataset>_index.ehashind` and `<dataset>_index.ehashhdr`.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    pub(crate) dataset: PathBuf,
    pub(crate) primary_key: bool,
    pub(crate) block_size: usize,
    pub(crate) global_depth: u8,
}

impl IndexConfig {
    /// Create a config for the dataset at `dataset` with default block size and depth.
    /// Indexes are primary (unique key) unless told otherwise.
    pub fn new<P: Into<PathBuf>>(dataset: P) -> Self {
        Self {
            dataset: dataset.into(),
            primary_key: true,
            block_size: BLOCK_SIZE,
            global_depth: DEFAULT_GLOBAL_DEPTH,
        }
    }

    /// Whether the indexed key is unique.
    pub fn with_primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Size in bytes of each bucket block.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Number of hash bits the directory may use, `D`.
    pub fn with_global_depth(mut self, global_depth: u8) -> Self {
        self.global_depth = global_depth;
        self
    }

    pub fn dataset(&self) -> &Path {
        &self.dataset
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn global_depth(&self) -> u8 {
        self.global_depth
    }

    pub fn bucket_path(&self) -> PathBuf {
        self.suffixed(BUCKET_FILE_SUFFIX)
    }

    pub fn directory_path(&self) -> PathBuf {
        self.suffixed(DIRECTORY_FILE_SUFFIX)
    }

    /// Settings the index was built with, see [`IndexHeader`](crate::header::IndexHeader).
    pub fn header_path(&self) -> PathBuf {
        self.suffixed(HEADER_FILE_SUFFIX)
    }

    fn suffixed(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self.dataset.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Records of `record_width` bytes that fit in one block:
    /// `(block_size - 2 * 8) / record_width`.
    pub fn capacity_for(&self, record_width: usize) -> usize {
        if record_width == 0 {
            return 0;
        }
        self.block_size.saturating_sub(BUCKET_HEADER) / record_width
    }

    /// Checks the settings for records of `record_width` bytes and returns the
    /// bucket capacity they give.
    pub fn validate(&self, record_width: usize) -> Result<usize> {
        if self.global_depth == 0 || self.global_depth > MAX_GLOBAL_DEPTH {
            return Err(IndexError::InvalidConfig(format!(
                "global depth must be between 1 and {}, got {}",
                MAX_GLOBAL_DEPTH, self.global_depth
            )));
        }
        if record_width == 0 {
            return Err(IndexError::InvalidConfig(
                "records must have a non-zero width".into(),
            ));
        }
        let capacity = self.capacity_for(record_width);
        if capacity == 0 {
            return Err(IndexError::InvalidConfig(format!(
                "block size {} cannot hold a single {} byte record",
                self.block_size, record_width
            )));
        }
        Ok(capacity)
    }
}
