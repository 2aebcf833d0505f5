//! Disk-backed extendible hashing index over files of fixed-width records,
//! plus a small key/value store built on it.

pub mod bucket;
pub mod bytes;
pub mod command;
pub mod config;
pub mod consts;
pub mod dataset;
pub mod directory;
pub mod error;
pub mod execute;
pub mod hasher;
pub mod header;
pub mod index;
pub mod parse;
pub mod repl;
pub mod server;
pub mod setup;
pub mod stdin;
pub mod storage;

pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use index::{ExtendibleHashFile, IndexStats};
