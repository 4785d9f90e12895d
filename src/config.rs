//! Memory pool configuration, stored as RON.

use std::io::{BufReader, Read};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

pub const POOL_CONFIG_FILENAME: &str = "memory_pool.ron";

/// Default size of each block requested from the device, in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024 * 128;

/// How a block is searched for a free chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSearch {
    /// Only a chunk at least as large as a whole block qualifies, so each block ends up serving a
    /// single allocation. Fast, and wasteful for small resources.
    BlockGranularity,
    /// Smallest chunk that still fits the request once alignment padding is added.
    Precise,
}

impl Default for ChunkSearch {
    fn default() -> Self {
        ChunkSearch::BlockGranularity
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Bytes requested from the device per block. No single allocation may be bigger than this.
    pub block_size: u64,
    pub chunk_search: ChunkSearch,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_search: ChunkSearch::default(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not read memory pool config file, i/o error: {0:?}")]
    CouldntOpenConfig(#[from] std::io::Error),
    #[error("Could not parse memory pool config file due to: {0}")]
    CouldntParseConfig(#[from] ron::error::SpannedError),
    #[error("Could not write memory pool config: {0}")]
    CouldntWriteConfig(#[from] ron::Error),
    #[error("Memory block size must be at least one byte, got {0}")]
    InvalidBlockSize(u64),
}

impl PoolConfig {
    pub fn new(block_size: u64, chunk_search: ChunkSearch) -> Result<Self, ConfigError> {
        PoolConfig { block_size, chunk_search }.validated()
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize(self.block_size));
        }
        Ok(self)
    }

    /// Parses and validates a RON document. Missing fields take their defaults.
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: PoolConfig = ron::from_str(source)?;
        config.validated()
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }
}

/// Reads a pool config from `path`, strictly.
pub fn read_pool_config<P: AsRef<Path>>(path: P) -> Result<PoolConfig, ConfigError> {
    let file = std::fs::OpenOptions::new().read(true).open(path)?;
    let mut buf_reader = BufReader::new(file);
    let mut contents = String::new();
    buf_reader.read_to_string(&mut contents)?;
    PoolConfig::from_ron_str(contents.as_str())
}

/// Reads a pool config from `path`. If that doesn't work, logs why and uses built-in defaults.
pub fn load_pool_config<P: AsRef<Path>>(path: P) -> PoolConfig {
    match read_pool_config(path.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                "Couldn't load memory pool config from {}, using defaults. Error was: {:?}",
                path.as_ref().display(),
                e
            );
            PoolConfig::default()
        }
    }
}
