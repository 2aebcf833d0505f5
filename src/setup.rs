use crate::config::IndexConfig;
use crate::consts::{BLOCK_SIZE, DEFAULT_GLOBAL_DEPTH};
use crate::storage::*;
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_DB_FILE: &str = "data.db";

/// Config for the key/value store at `dataset`.
pub fn default_config<P: Into<PathBuf>>(dataset: P) -> IndexConfig {
    IndexConfig::new(dataset)
        .with_primary_key(true)
        .with_block_size(BLOCK_SIZE)
        .with_global_depth(DEFAULT_GLOBAL_DEPTH)
}

/// Opens the storage engine, building the index from the data file when it
/// has none yet.
pub fn setup_db(config: IndexConfig) -> Result<StorageEngine> {
    info!(
        dataset = %config.dataset().display(),
        block_size = config.block_size(),
        global_depth = config.global_depth(),
        "opening storage"
    );
    StorageEngine::open(config)
}
