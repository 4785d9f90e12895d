//! Device memory sub-allocator for the Gestalt renderer.
//!
//! See [memory] for how blocks, chunks and allocations relate.

pub mod config;
pub mod memory;

pub use config::{load_pool_config, ChunkSearch, ConfigError, PoolConfig};
pub use memory::{
    AllocLayout, AllocationHandle, HostDevice, MemoryDevice, MemoryError, MemoryPool,
    MemoryPropertyFlags, MemoryRequirements, MemoryTypeIndex,
};
