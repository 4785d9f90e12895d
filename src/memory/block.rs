//! Blocks of device memory and the free-chunk registry inside each one.
//!
//! A [Block] is one allocation obtained from the device. It never touches the memory itself, it
//! only keeps track of which byte ranges are still free, so the same code works for any backend.

use std::collections::BTreeSet;

use log::debug;

use super::types::{AllocLayout, MemoryTypeIndex};
use crate::config::ChunkSearch;

/// ID of a block, unique within the pool that created it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

/// A free region of a block.
///
/// Field order matters: the derived `Ord` sorts by size and then by offset, which is what lets the
/// registry answer "smallest chunk of at least `n` bytes" with a range query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Chunk {
    pub size: u64,
    pub offset: u64,
}

impl Chunk {
    pub const fn new(offset: u64, size: u64) -> Self {
        Chunk { size, offset }
    }

    /// Smallest possible key with at least `size` bytes.
    const fn lower_bound(size: u64) -> Self {
        Chunk { size, offset: 0 }
    }
}

/// Result of carving an allocation out of a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Carve {
    /// Aligned offset of the allocation inside the block.
    pub offset: u64,
    /// Bytes skipped in front of the allocation to reach alignment. These are not reusable.
    pub padding: u64,
    /// What went back into the registry, if anything was left over.
    pub remainder: Option<Chunk>,
}

/// Bytes needed to move `offset` up to the next multiple of `alignment`. An alignment of zero is
/// treated as one.
#[inline]
pub fn alignment_padding(offset: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    match offset % alignment {
        0 => 0,
        rem => alignment - rem,
    }
}

/// One fixed-size allocation of device memory, subdivided by the pool.
#[derive(Debug)]
pub struct Block<M> {
    id: BlockId,
    memory: M,
    type_index: MemoryTypeIndex,
    layout: AllocLayout,
    capacity: u64,
    available: u64,
    allocation_count: usize,
    chunks: BTreeSet<Chunk>,
}

impl<M: Copy> Block<M> {
    /// Wraps freshly allocated device memory. The whole block starts out as one free chunk.
    pub fn new(
        id: BlockId,
        memory: M,
        type_index: MemoryTypeIndex,
        layout: AllocLayout,
        capacity: u64,
    ) -> Self {
        let mut chunks = BTreeSet::new();
        if capacity > 0 {
            chunks.insert(Chunk::new(0, capacity));
        }
        Block {
            id,
            memory,
            type_index,
            layout,
            capacity,
            available: capacity,
            allocation_count: 0,
            chunks,
        }
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn memory(&self) -> M {
        self.memory
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
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes not yet carved out, padding included.
    #[inline]
    pub fn available(&self) -> u64 {
        self.available
    }

    /// Bytes carved out so far, padding included.
    #[inline]
    pub fn used(&self) -> u64 {
        self.capacity - self.available
    }

    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Free chunks, smallest first.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Looks for a chunk that can hold `size` bytes at `alignment` under the given search policy.
    /// Returns `None` if this block is exhausted for that request.
    pub fn find_chunk(&self, size: u64, alignment: u64, search: ChunkSearch) -> Option<Chunk> {
        if self.available < size {
            return None;
        }
        match search {
            ChunkSearch::BlockGranularity => {
                self.chunks.range(Chunk::lower_bound(self.capacity)..).next().copied()
            }
            ChunkSearch::Precise => self
                .chunks
                .range(Chunk::lower_bound(size)..)
                .find(|chunk| {
                    size.checked_add(alignment_padding(chunk.offset, alignment))
                        .map_or(false, |needed| needed <= chunk.size)
                })
                .copied(),
        }
    }

    /// Takes `chunk` out of the registry and carves `size` bytes at `alignment` from its front.
    /// The leftover tail goes back in as a new chunk unless it is empty.
    ///
    /// Returns `None`, leaving the block untouched, if `chunk` is not registered here or is too
    /// small once padding is added.
    pub fn carve(&mut self, chunk: Chunk, size: u64, alignment: u64) -> Option<Carve> {
        let padding = alignment_padding(chunk.offset, alignment);
        let consumed = size.checked_add(padding).filter(|consumed| *consumed <= chunk.size)?;
        if consumed > self.available || !self.chunks.remove(&chunk) {
            return None;
        }

        self.available -= consumed;
        self.allocation_count += 1;

        let remainder = Chunk::new(chunk.offset + consumed, chunk.size - consumed);
        let remainder = if remainder.size > 0 {
            self.chunks.insert(remainder);
            Some(remainder)
        } else {
            None
        };

        let offset = chunk.offset + padding;
        debug!(
            "Carved {} bytes (+{} padding) at offset {} from block {:?} of memory type {}, \
             {} bytes left",
            size,
            padding,
            offset,
            self.id,
            self.type_index,
            self.available
        );
        Some(Carve { offset, padding, remainder })
    }

    #[cfg(test)]
    pub(crate) fn insert_chunk_for_test(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk);
    }
}

// Tests ///////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn block(capacity: u64) -> Block<u32> {
        Block::new(BlockId(1), 7, MemoryTypeIndex(0), AllocLayout::Linear, capacity)
    }

    fn carve_precise(block: &mut Block<u32>, size: u64, alignment: u64) -> Option<Carve> {
        let chunk = block.find_chunk(size, alignment, ChunkSearch::Precise)?;
        block.carve(chunk, size, alignment)
    }

    #[test]
    fn padding_formula() {
        assert_eq!(alignment_padding(0, 256), 0);
        assert_eq!(alignment_padding(100, 1), 0);
        assert_eq!(alignment_padding(100, 0), 0);
        assert_eq!(alignment_padding(100, 64), 28);
        assert_eq!(alignment_padding(128, 64), 0);
        assert_eq!(alignment_padding(5, 5), 0);
        assert_eq!(alignment_padding(6, 5), 4);
    }

    #[test]
    fn new_block_is_one_free_chunk() {
        let b = block(1024);
        assert_eq!(b.chunks().copied().collect::<Vec<_>>(), vec![Chunk::new(0, 1024)]);
        assert_eq!(b.available(), 1024);
        assert_eq!(b.used(), 0);
        assert_eq!(b.memory(), 7);
    }

    #[test]
    fn carve_splits_chunk() {
        let mut b = block(1024);
        let carve = carve_precise(&mut b, 100, 1).unwrap();
        assert_eq!(carve.offset, 0);
        assert_eq!(carve.padding, 0);
        assert_eq!(carve.remainder, Some(Chunk::new(100, 924)));
        assert_eq!(b.available(), 924);
        assert_eq!(b.chunks().copied().collect::<Vec<_>>(), vec![Chunk::new(100, 924)]);
    }

    #[test]
    fn carve_respects_alignment() {
        let mut b = block(1024);
        carve_precise(&mut b, 100, 1).unwrap();
        let carve = carve_precise(&mut b, 10, 64).unwrap();
        assert_eq!(carve.offset, 128);
        assert_eq!(carve.padding, 28);
        assert_eq!(carve.remainder, Some(Chunk::new(138, 886)));
        assert_eq!(b.available(), 1024 - 100 - 28 - 10);
        assert_eq!(b.allocation_count(), 2);
    }

    #[test]
    fn exact_fit_leaves_no_chunk() {
        let mut b = block(256);
        let carve = carve_precise(&mut b, 256, 16).unwrap();
        assert_eq!(carve.remainder, None);
        assert_eq!(b.chunks().count(), 0);
        assert_eq!(b.available(), 0);
        assert_eq!(carve_precise(&mut b, 1, 1), None);
    }

    #[test]
    fn precise_search_accounts_for_padding() {
        let mut b = block(128);
        carve_precise(&mut b, 1, 1).unwrap();
        // 127 bytes left starting at offset 1; 64-byte alignment wastes 63 of them.
        assert!(b.find_chunk(64, 64, ChunkSearch::Precise).is_some());
        assert!(b.find_chunk(65, 64, ChunkSearch::Precise).is_none());
        assert!(b.find_chunk(126, 1, ChunkSearch::Precise).is_some());
    }

    #[test]
    fn precise_search_takes_smallest_fitting_chunk() {
        let mut b = block(4096);
        carve_precise(&mut b, 4096, 1).unwrap();
        b.insert_chunk_for_test(Chunk::new(0, 512));
        b.insert_chunk_for_test(Chunk::new(1024, 128));
        b.insert_chunk_for_test(Chunk::new(2048, 256));
        b.available += 512 + 128 + 256;

        assert_eq!(b.find_chunk(100, 1, ChunkSearch::Precise), Some(Chunk::new(1024, 128)));
        assert_eq!(b.find_chunk(200, 1, ChunkSearch::Precise), Some(Chunk::new(2048, 256)));
        // 2048 + 0 padding fits 256; 1024's chunk is too small either way.
        assert_eq!(b.find_chunk(256, 2048, ChunkSearch::Precise), Some(Chunk::new(2048, 256)));
        assert_eq!(b.find_chunk(600, 1, ChunkSearch::Precise), None);
    }

    #[test]
    fn block_granularity_only_accepts_a_fresh_block() {
        let mut b = block(1024);
        let chunk = b.find_chunk(100, 1, ChunkSearch::BlockGranularity).unwrap();
        assert_eq!(chunk, Chunk::new(0, 1024));
        b.carve(chunk, 100, 1).unwrap();
        assert_eq!(b.find_chunk(1, 1, ChunkSearch::BlockGranularity), None);
        // The remainder is still there for a precise search.
        assert!(b.find_chunk(1, 1, ChunkSearch::Precise).is_some());
    }

    #[test]
    fn find_checks_available_size_first() {
        let b = block(64);
        assert_eq!(b.find_chunk(65, 1, ChunkSearch::Precise), None);
        assert_eq!(b.find_chunk(65, 1, ChunkSearch::BlockGranularity), None);
    }

    #[test]
    fn carve_of_unknown_chunk_leaves_block_untouched() {
        let mut b = block(1024);
        assert_eq!(b.carve(Chunk::new(0, 512), 10, 1), None);
        assert_eq!(b.carve(Chunk::new(0, 1024), 2000, 1), None);
        assert_eq!(b.available(), 1024);
        assert_eq!(b.allocation_count(), 0);
        assert_eq!(b.chunks().count(), 1);
    }

    #[test]
    fn complex_behavior_test() {
        let mut b = block(64);
        let offsets: Vec<u64> = [(4, 4), (8, 4), (3, 8), (1, 1), (5, 16)]
            .iter()
            .map(|&(size, align)| carve_precise(&mut b, size, align).unwrap().offset)
            .collect();
        assert_eq!(offsets, vec![0, 4, 16, 19, 32]);
        assert_eq!(b.available(), 64 - 37);
        assert_eq!(b.chunks().copied().collect::<Vec<_>>(), vec![Chunk::new(37, 27)]);
        assert_eq!(carve_precise(&mut b, 1, 64), None);
    }
}
