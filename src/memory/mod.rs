//! Device memory management types.
//!
//! [MemoryPool]: self::pool::MemoryPool
//! [Block]: self::block::Block
//! [Chunk]: self::block::Chunk
//! [AllocationHandle]: self::pool::AllocationHandle
//! [MemoryDevice]: self::device::MemoryDevice
//! [HostDevice]: self::device::HostDevice
//! [find_memory_type]: self::selector::find_memory_type
//!
//! # Overview
//!
//! tl;dr - [MemoryPool] hands out [AllocationHandle]s for buffers and images, asking the device for
//! a new [Block] only when the ones it already has are full.
//!
//! The memory management hierarchy is as follows:
//!
//! ## Device memory
//!
//! The lowest level is memory allocated on the GPU itself, through whatever implements
//! [MemoryDevice]. Device allocations are slow and the number of live ones is capped by the driver
//! (often at 4096), so they should happen rarely. The pool always requests memory in fixed-size
//! blocks (`PoolConfig::block_size`).
//!
//! Which memory type a request lands in is decided by [find_memory_type]: the first type allowed
//! by the resource's type bits that has every required property flag.
//!
//! ## Blocks
//!
//! A [Block] is one device allocation for one memory type. It keeps a registry of free [Chunk]s,
//! sorted by size, and a count of the bytes not yet handed out. A fresh block is a single chunk.
//!
//! ## Allocations
//!
//! An allocation is a region carved from the front of a chunk, aligned as the resource requires.
//! The tail of the chunk goes back into the registry. Alignment padding in front of the region is
//! lost. Allocations are never returned to their block: memory comes back only when the whole pool
//! is released, so [MemoryPool] behaves like an arena.
//!
//! With [ChunkSearch::BlockGranularity](crate::config::ChunkSearch) a block only qualifies while it
//! still has a chunk as large as a whole block, so every allocation gets a block to itself. With
//! [ChunkSearch::Precise](crate::config::ChunkSearch) the smallest chunk that fits the request
//! plus padding is used.

pub mod block;
pub mod device;
pub mod error;
pub mod pool;
pub mod selector;
pub mod types;

#[cfg(feature = "ash")]
pub mod ash_device;

pub use self::block::{BlockId, Chunk};
pub use self::device::{HostDevice, HostMemory, MemoryDevice};
pub use self::error::{DeviceError, MemoryError};
pub use self::pool::{AllocationHandle, BlockSummary, MemoryPool, MemoryStats, PoolStats};
pub use self::selector::find_memory_type;
pub use self::types::{
    AllocLayout, MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryRequirements, MemoryType,
    MemoryTypeIndex,
};

#[cfg(feature = "ash")]
pub use self::ash_device::AshDevice;
