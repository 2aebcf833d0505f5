/// Default size of one bucket block in the bucket file
pub const BLOCK_SIZE: usize = 1024;

/// Default number of hash bits the directory may ever use
pub const DEFAULT_GLOBAL_DEPTH: u8 = 32;

/// Widest address space a directory can address, bounded by the 64 bit hash
pub const MAX_GLOBAL_DEPTH: u8 = 64;

/// Width of every integer stored on disk (count, overflow link, local depth, bucket ref)
pub const INT_SIZE: usize = 8;

/// Bytes of a bucket block taken by the count and the overflow link
pub const BUCKET_HEADER: usize = 2 * INT_SIZE;

/// Overflow link value meaning "no next bucket"
pub const NO_OVERFLOW: i64 = -1;

pub const BUCKET_FILE_SUFFIX: &str = ".ehash";

pub const DIRECTORY_FILE_SUFFIX: &str = "_index.ehashind";

pub const HEADER_FILE_SUFFIX: &str = "_index.ehashhdr";

/// Bytes reserved for a key in a key/value record, NUL padded
pub const KV_KEY_SIZE: usize = 32;

/// Bytes reserved for a value in a key/value record, NUL padded
pub const KV_VALUE_SIZE: usize = 96;
