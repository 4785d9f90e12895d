//! Memory pool types.
//!
//! [MemoryPool] is a memory managed pool that only allocates new blocks of device memory when
//! needed, carving allocations out of existing blocks when possible.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex;

use super::block::{Block, BlockId, Chunk};
use super::device::MemoryDevice;
use super::error::MemoryError;
use super::selector::find_memory_type;
use super::types::{AllocLayout, MemoryPropertyFlags, MemoryRequirements, MemoryTypeIndex};
use crate::config::PoolConfig;

/// A region carved out of a block.
///
/// Handles are plain values. They don't own anything and don't give memory back when dropped;
/// the [MemoryPool] that issued them owns the memory and must outlive every use of it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AllocationHandle<M> {
    memory: M,
    block: BlockId,
    type_index: MemoryTypeIndex,
    layout: AllocLayout,
    size: u64,
    offset: u64,
}

impl<M: Copy> AllocationHandle<M> {
    /// Device memory to bind against, together with [offset](AllocationHandle::offset).
    #[inline]
    pub fn memory(&self) -> M {
        self.memory
    }

    #[inline]
    pub fn block(&self) -> BlockId {
        self.block
    }

    #[inline]
    pub fn type_index(&self) -> MemoryTypeIndex {
        self.type_index
    }

    #[inline]
    pub fn layout(&self) -> AllocLayout {
        self.layout
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte range covered inside the block.
    pub fn range(&self) -> Range<u64> {
        self.offset..(self.offset + self.size)
    }
}

/// Counters for a set of blocks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub blocks: usize,
    pub allocations: usize,
    /// Bytes obtained from the device.
    pub bytes_reserved: u64,
    /// Bytes carved out, alignment padding included.
    pub bytes_used: u64,
    pub bytes_available: u64,
}

impl MemoryStats {
    /// Byte totals saturate at `u64::MAX`.
    fn add_block<M: Copy>(&mut self, block: &Block<M>) {
        self.blocks += 1;
        self.allocations += block.allocation_count();
        self.bytes_reserved = self.bytes_reserved.saturating_add(block.capacity());
        self.bytes_used = self.bytes_used.saturating_add(block.used());
        self.bytes_available = self.bytes_available.saturating_add(block.available());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: MemoryStats,
    pub per_type: BTreeMap<MemoryTypeIndex, MemoryStats>,
}

/// Read-only view of one block, for reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSummary {
    pub id: BlockId,
    pub type_index: MemoryTypeIndex,
    pub layout: AllocLayout,
    pub capacity: u64,
    pub available: u64,
    pub allocations: usize,
    pub free_chunks: Vec<Chunk>,
}

/// Blocks are never shared between memory types or between layouts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct BlockKey {
    type_index: MemoryTypeIndex,
    layout: AllocLayout,
}

#[derive(Debug)]
struct MemoryPoolInner<M> {
    /// Blocks per key, in the order they were created.
    blocks: BTreeMap<BlockKey, Vec<Block<M>>>,
    next_block_id: u64,
}

/// Memory managed pool that only allocates new blocks of device memory when needed, yielding
/// regions of existing blocks when possible.
///
/// Every block stays alive until the pool is dropped (or [release_all](MemoryPool::release_all) is
/// called). Individual allocations are never returned to their block.
///
/// All block state sits behind one mutex, so searching a block and carving from it happen as a
/// single step even when the pool is shared between threads.
#[derive(Debug)]
pub struct MemoryPool<D: MemoryDevice> {
    device: Arc<D>,
    config: PoolConfig,
    inner: Mutex<MemoryPoolInner<D::Memory>>,
}

impl<D: MemoryDevice> MemoryPool<D> {
    /// Creates an empty pool. No device memory is allocated until the first request.
    pub fn new(device: Arc<D>, config: PoolConfig) -> Self {
        MemoryPool {
            device,
            config,
            inner: Mutex::new(MemoryPoolInner {
                blocks: BTreeMap::new(),
                next_block_id: 1,
            }),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// First memory type of this pool's device allowed by `type_filter` that has every flag in
    /// `required`.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        required: MemoryPropertyFlags,
    ) -> Option<MemoryTypeIndex> {
        find_memory_type(&self.device.memory_properties(), type_filter, required)
    }

    /// Allocates memory for a buffer or linear image.
    pub fn allocate(
        &self,
        requirements: &MemoryRequirements,
        properties: MemoryPropertyFlags,
    ) -> Result<AllocationHandle<D::Memory>, MemoryError> {
        self.allocate_with_layout(requirements, properties, AllocLayout::Linear)
    }

    /// Provides a region of memory to use, allocating a new block when no existing block of the
    /// chosen memory type has room.
    pub fn allocate_with_layout(
        &self,
        requirements: &MemoryRequirements,
        properties: MemoryPropertyFlags,
        layout: AllocLayout,
    ) -> Result<AllocationHandle<D::Memory>, MemoryError> {
        let type_index = self
            .find_memory_type(requirements.memory_type_bits, properties)
            .ok_or(MemoryError::NoSuitableMemoryType {
                type_filter: requirements.memory_type_bits,
                required: properties,
            })?;

        let size = requirements.size;
        let alignment = requirements.alignment;
        if size > self.config.block_size {
            return Err(MemoryError::RequestTooLarge {
                requested: size,
                block_size: self.config.block_size,
            });
        }

        let key = BlockKey { type_index, layout };
        let search = self.config.chunk_search;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let existing = inner.blocks.get(&key).and_then(|blocks| {
            blocks.iter().enumerate().find_map(|(i, block)| {
                block.find_chunk(size, alignment, search).map(|chunk| (i, chunk))
            })
        });

        let (index, chunk) = match existing {
            Some(found) => found,
            None => {
                // no room in any block of this type, need a new one
                let block = self.allocate_block(key, size, &mut inner.next_block_id)?;
                let chunk = block.find_chunk(size, alignment, search);
                let block_id = block.id();
                let blocks = inner.blocks.entry(key).or_default();
                blocks.push(block);
                match chunk {
                    Some(chunk) => (blocks.len() - 1, chunk),
                    None => return Err(consistency_failure(type_index, block_id)),
                }
            }
        };

        let block = inner
            .blocks
            .get_mut(&key)
            .and_then(|blocks| blocks.get_mut(index))
            .ok_or_else(|| consistency_failure(type_index, BlockId(0)))?;
        let carve = block
            .carve(chunk, size, alignment)
            .ok_or_else(|| consistency_failure(type_index, block.id()))?;

        Ok(AllocationHandle {
            memory: block.memory(),
            block: block.id(),
            type_index,
            layout,
            size,
            offset: carve.offset,
        })
    }

    /// Requests one block of `config.block_size` bytes from the device.
    fn allocate_block(
        &self,
        key: BlockKey,
        requested: u64,
        next_block_id: &mut u64,
    ) -> Result<Block<D::Memory>, MemoryError> {
        let block_size = self.config.block_size;
        if requested > block_size {
            return Err(MemoryError::RequestTooLarge { requested, block_size });
        }

        let memory = self.device.allocate_memory(key.type_index, block_size).map_err(|source| {
            warn!(
                "Device refused a {}-byte block of memory type {}: {}",
                block_size, key.type_index, source
            );
            MemoryError::DeviceAllocationFailure {
                type_index: key.type_index,
                size: block_size,
                source,
            }
        })?;

        let id = BlockId(*next_block_id);
        *next_block_id += 1;
        info!(
            "Allocated memory block {:?} ({} bytes, memory type {}, {:?} layout)",
            id, block_size, key.type_index, key.layout
        );
        Ok(Block::new(id, memory, key.type_index, key.layout, block_size))
    }

    /// Gives every block back to the device and forgets about it. Returns how many blocks were
    /// freed. Any [AllocationHandle] issued before this is dangling afterwards.
    pub fn release_all(&self) -> usize {
        let blocks = std::mem::take(&mut self.inner.lock().blocks);
        let mut released = 0;
        for block in blocks.into_values().flatten() {
            self.device.free_memory(block.memory());
            released += 1;
        }
        if released > 0 {
            info!("Released {} memory blocks", released);
        }
        released
    }

    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.values().map(Vec::len).sum()
    }

    /// Blocks of one memory type, across both layouts.
    pub fn block_count_for_type(&self, type_index: MemoryTypeIndex) -> usize {
        self.inner
            .lock()
            .blocks
            .iter()
            .filter(|(key, _)| key.type_index == type_index)
            .map(|(_, blocks)| blocks.len())
            .sum()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        let mut stats = PoolStats::default();
        for (key, blocks) in inner.blocks.iter() {
            let per_type = stats.per_type.entry(key.type_index).or_default();
            for block in blocks {
                per_type.add_block(block);
                stats.total.add_block(block);
            }
        }
        stats
    }

    /// Every block, ordered by memory type, then layout, then creation.
    pub fn blocks(&self) -> Vec<BlockSummary> {
        let inner = self.inner.lock();
        inner
            .blocks
            .values()
            .flatten()
            .map(|block| BlockSummary {
                id: block.id(),
                type_index: block.type_index(),
                layout: block.layout(),
                capacity: block.capacity(),
                available: block.available(),
                allocations: block.allocation_count(),
                free_chunks: block.chunks().copied().collect(),
            })
            .collect()
    }
}

impl<D: MemoryDevice> Drop for MemoryPool<D> {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn consistency_failure(type_index: MemoryTypeIndex, block: BlockId) -> MemoryError {
    error!(
        "Chunk search and extraction disagree on block {:?} of memory type {}, \
         block state is corrupt",
        block,
        type_index
    );
    MemoryError::InternalConsistencyFailure { type_index, block }
}

// Tests ///////////////////////////////////////////////////////////////////////////////////////////
