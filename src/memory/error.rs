use super::block::BlockId;
use super::types::{MemoryPropertyFlags, MemoryTypeIndex};

/// Status reported by a device when it refuses to hand out a block.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("too many live device memory allocations")]
    TooManyObjects,
    #[error("device returned status code {0}")]
    Other(i32),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error(
        "No memory type matches type filter {type_filter:#b} with required properties {required:?}"
    )]
    NoSuitableMemoryType {
        type_filter: u32,
        required: MemoryPropertyFlags,
    },
    #[error(
        "Requested allocation of {requested} bytes is bigger than the memory block size of \
         {block_size} bytes"
    )]
    RequestTooLarge { requested: u64, block_size: u64 },
    #[error(
        "Failed to allocate a {size}-byte block of memory type {type_index} from the device: \
         {source}"
    )]
    DeviceAllocationFailure {
        type_index: MemoryTypeIndex,
        size: u64,
        #[source]
        source: DeviceError,
    },
    #[error(
        "Block {block:?} of memory type {type_index} passed the chunk search but no chunk could \
         be extracted"
    )]
    InternalConsistencyFailure {
        type_index: MemoryTypeIndex,
        block: BlockId,
    },
}
