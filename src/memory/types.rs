//! Plain data types shared by the memory pool and its device backends.

use std::fmt;

/// Index of one of the memory types a physical device enumerates. Vulkan caps this at 32.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryTypeIndex(pub u32);

impl fmt::Display for MemoryTypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MemoryTypeIndex {
    fn from(value: u32) -> Self {
        MemoryTypeIndex(value)
    }
}

/// Maximum number of memory types a device may report.
pub const MAX_MEMORY_TYPES: usize = 32;

bitflags::bitflags! {
    /// Properties of a memory type. Bit values match `VkMemoryPropertyFlagBits`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        const DEVICE_LOCAL = 0x0000_0001;
        const HOST_VISIBLE = 0x0000_0002;
        const HOST_COHERENT = 0x0000_0004;
        const HOST_CACHED = 0x0000_0008;
        const LAZILY_ALLOCATED = 0x0000_0010;
        const PROTECTED = 0x0000_0020;
    }
}

impl Default for MemoryPropertyFlags {
    fn default() -> Self {
        MemoryPropertyFlags::empty()
    }
}

/// One entry of the device's memory type list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

impl MemoryType {
    pub const fn new(property_flags: MemoryPropertyFlags, heap_index: u32) -> Self {
        MemoryType { property_flags, heap_index }
    }
}

/// One of the device's memory heaps. Only used for reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryHeap {
    pub size: u64,
    pub device_local: bool,
}

/// Everything a device reports about its memory, in enumeration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryProperties {
    pub memory_types: Vec<MemoryType>,
    pub memory_heaps: Vec<MemoryHeap>,
}

impl MemoryProperties {
    /// Iterates `(index, type)` pairs in the order the device reported them.
    pub fn indexed_types(&self) -> impl Iterator<Item = (MemoryTypeIndex, &MemoryType)> {
        self.memory_types
            .iter()
            .take(MAX_MEMORY_TYPES)
            .enumerate()
            .map(|(i, ty)| (MemoryTypeIndex(i as u32), ty))
    }
}

/// Size, alignment and legal memory types for one buffer or image, as the device reports them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
    /// Bit `i` set means memory type `i` may back this resource.
    pub memory_type_bits: u32,
}

impl MemoryRequirements {
    pub const fn new(size: u64, alignment: u64, memory_type_bits: u32) -> Self {
        MemoryRequirements { size, alignment, memory_type_bits }
    }
}

/// How the resource lays out its memory. Linear and optimal resources are kept in separate blocks
/// so a linear buffer never sits next to an optimal-tiled image inside one block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocLayout {
    /// Buffers and linear-tiled images.
    Linear,
    /// Optimal-tiled images.
    Optimal,
}

impl Default for AllocLayout {
    fn default() -> Self {
        AllocLayout::Linear
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_flags_superset() {
        let flags = MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT;
        assert!(flags.contains(MemoryPropertyFlags::HOST_VISIBLE));
        assert!(flags.contains(MemoryPropertyFlags::empty()));
        assert!(!flags.contains(
            MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE
        ));
    }

    #[test]
    fn indexed_types_stops_at_thirty_two() {
        let properties = MemoryProperties {
            memory_types: vec![MemoryType::new(MemoryPropertyFlags::DEVICE_LOCAL, 0); 40],
            memory_heaps: Vec::new(),
        };
        let indices: Vec<MemoryTypeIndex> = properties.indexed_types().map(|(i, _)| i).collect();
        assert_eq!(indices.len(), MAX_MEMORY_TYPES);
        assert_eq!(indices[0], MemoryTypeIndex(0));
        assert_eq!(indices[31], MemoryTypeIndex(31));
    }
}
