use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Exactly one of the directory file and the bucket file has content.
    #[error(
        "corrupt index file structure: directory file has {directory_bytes} bytes, bucket file has {bucket_bytes} bytes"
    )]
    StructuralCorruption {
        directory_bytes: u64,
        bucket_bytes: u64,
    },

    /// A split was needed on an entry that already uses every hash bit.
    #[error("address space exhausted: cannot split an entry at local depth {depth}")]
    AddressSpaceExhausted { depth: u8 },

    /// No directory entry claims the given bit string.
    #[error("no directory entry matches hash bits {bits}")]
    LookupInconsistency { bits: String },

    #[error("corrupt directory file: {0}")]
    CorruptDirectory(String),

    #[error("corrupt index header: {0}")]
    CorruptHeader(String),

    #[error("corrupt bucket at offset {offset}: {reason}")]
    CorruptBucket { offset: u64, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a record with this key is already indexed")]
    DuplicateKey,

    #[error("record decode error: {0}")]
    RecordDecode(String),
}
