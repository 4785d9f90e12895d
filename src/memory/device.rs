//! The device side of the allocator: what a [MemoryPool](super::MemoryPool) needs from a graphics
//! device, plus [HostDevice], a software device that keeps everything in process.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::error::DeviceError;
use super::types::{
    MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryType, MemoryTypeIndex,
};

/// Capabilities the allocator consumes from a device.
pub trait MemoryDevice {
    /// Opaque handle to one device memory allocation.
    type Memory: Copy + Debug + Eq + Hash;

    /// Memory types and heaps of the physical device, in enumeration order.
    fn memory_properties(&self) -> MemoryProperties;

    /// Allocates `size` bytes of memory type `type_index`.
    fn allocate_memory(
        &self,
        type_index: MemoryTypeIndex,
        size: u64,
    ) -> Result<Self::Memory, DeviceError>;

    /// Returns memory obtained from [allocate_memory](MemoryDevice::allocate_memory). Called once
    /// per allocation.
    fn free_memory(&self, memory: Self::Memory);
}

/// Handle to memory handed out by a [HostDevice].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostMemory(pub u64);

#[derive(Debug, Default)]
struct HostDeviceState {
    live: HashMap<HostMemory, u64>,
    allocate_calls: u64,
    free_calls: u64,
    failed_calls: u64,
    bytes_live: u64,
}

/// Software device that hands out numbered memory handles without backing them with real memory.
///
/// Counts every call made to it, and can be capped at a number of live allocations to imitate a
/// device running out of memory.
#[derive(Debug)]
pub struct HostDevice {
    properties: MemoryProperties,
    max_live_allocations: Option<usize>,
    next_handle: AtomicU64,
    state: Mutex<HostDeviceState>,
}

impl HostDevice {
    pub fn new(properties: MemoryProperties) -> Self {
        HostDevice {
            properties,
            max_live_allocations: None,
            next_handle: AtomicU64::new(1),
            state: Mutex::new(HostDeviceState::default()),
        }
    }

    /// Refuse allocations with [DeviceError::OutOfDeviceMemory] once `max` are live.
    pub fn with_max_live_allocations(mut self, max: usize) -> Self {
        self.max_live_allocations = Some(max);
        self
    }

    /// Layout typical of a desktop card: VRAM, a host-visible staging type, a cached readback type
    /// and a small BAR window that is both.
    pub fn discrete_gpu() -> Self {
        HostDevice::new(MemoryProperties {
            memory_types: vec![
                MemoryType::new(MemoryPropertyFlags::DEVICE_LOCAL, 0),
                MemoryType::new(
                    MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                    1,
                ),
                MemoryType::new(
                    MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT
                        | MemoryPropertyFlags::HOST_CACHED,
                    1,
                ),
                MemoryType::new(
                    MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    2,
                ),
            ],
            memory_heaps: vec![
                MemoryHeap { size: 8 * 1024 * 1024 * 1024, device_local: true },
                MemoryHeap { size: 16 * 1024 * 1024 * 1024, device_local: false },
                MemoryHeap { size: 256 * 1024 * 1024, device_local: true },
            ],
        })
    }

    /// Layout typical of an integrated GPU sharing system memory.
    pub fn integrated_gpu() -> Self {
        HostDevice::new(MemoryProperties {
            memory_types: vec![
                MemoryType::new(MemoryPropertyFlags::DEVICE_LOCAL, 0),
                MemoryType::new(
                    MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    0,
                ),
                MemoryType::new(
                    MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT
                        | MemoryPropertyFlags::HOST_CACHED,
                    0,
                ),
            ],
            memory_heaps: vec![MemoryHeap { size: 4 * 1024 * 1024 * 1024, device_local: true }],
        })
    }

    pub fn allocate_calls(&self) -> u64 {
        self.state.lock().allocate_calls
    }

    pub fn free_calls(&self) -> u64 {
        self.state.lock().free_calls
    }

    /// Allocation calls the device refused.
    pub fn failed_calls(&self) -> u64 {
        self.state.lock().failed_calls
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn bytes_live(&self) -> u64 {
        self.state.lock().bytes_live
    }
}

impl MemoryDevice for HostDevice {
    type Memory = HostMemory;

    fn memory_properties(&self) -> MemoryProperties {
        self.properties.clone()
    }

    fn allocate_memory(
        &self,
        type_index: MemoryTypeIndex,
        size: u64,
    ) -> Result<HostMemory, DeviceError> {
        let mut state = self.state.lock();
        state.allocate_calls += 1;

        if type_index.0 as usize >= self.properties.memory_types.len() {
            state.failed_calls += 1;
            // VK_ERROR_UNKNOWN
            return Err(DeviceError::Other(-13));
        }
        if let Some(max) = self.max_live_allocations {
            if state.live.len() >= max {
                state.failed_calls += 1;
                return Err(DeviceError::OutOfDeviceMemory);
            }
        }

        // More bytes than fit in the address space can't be live at once.
        let bytes_live = match state.bytes_live.checked_add(size) {
            Some(bytes_live) => bytes_live,
            None => {
                state.failed_calls += 1;
                return Err(DeviceError::OutOfDeviceMemory);
            }
        };

        let memory = HostMemory(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.live.insert(memory, size);
        state.bytes_live = bytes_live;
        Ok(memory)
    }

    fn free_memory(&self, memory: HostMemory) {
        let mut state = self.state.lock();
        state.free_calls += 1;
        if let Some(size) = state.live.remove(&memory) {
            state.bytes_live -= size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_distinct_handles() {
        let device = HostDevice::discrete_gpu();
        let a = device.allocate_memory(MemoryTypeIndex(0), 64).unwrap();
        let b = device.allocate_memory(MemoryTypeIndex(0), 64).unwrap();
        assert_ne!(a, b);
        assert_eq!(device.live_allocations(), 2);
        assert_eq!(device.bytes_live(), 128);
    }

    #[test]
    fn free_counts_calls() {
        let device = HostDevice::integrated_gpu();
        let a = device.allocate_memory(MemoryTypeIndex(1), 64).unwrap();
        device.free_memory(a);
        assert_eq!(device.allocate_calls(), 1);
        assert_eq!(device.free_calls(), 1);
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.bytes_live(), 0);
    }

    #[test]
    fn cap_on_live_allocations() {
        let device = HostDevice::discrete_gpu().with_max_live_allocations(1);
        let a = device.allocate_memory(MemoryTypeIndex(0), 64).unwrap();
        assert_eq!(
            device.allocate_memory(MemoryTypeIndex(0), 64),
            Err(DeviceError::OutOfDeviceMemory)
        );
        assert_eq!(device.failed_calls(), 1);
        device.free_memory(a);
        assert!(device.allocate_memory(MemoryTypeIndex(0), 64).is_ok());
    }

    #[test]
    fn unknown_type_is_refused() {
        let device = HostDevice::integrated_gpu();
        assert!(matches!(
            device.allocate_memory(MemoryTypeIndex(9), 64),
            Err(DeviceError::Other(_))
        ));
    }

    #[test]
    fn live_bytes_cannot_exceed_the_address_space() {
        let device = HostDevice::discrete_gpu();
        let huge = device.allocate_memory(MemoryTypeIndex(1), u64::MAX).unwrap();
        assert_eq!(device.bytes_live(), u64::MAX);

        assert_eq!(
            device.allocate_memory(MemoryTypeIndex(1), 1),
            Err(DeviceError::OutOfDeviceMemory)
        );
        assert_eq!(device.failed_calls(), 1);
        assert_eq!(device.live_allocations(), 1);
        assert_eq!(device.bytes_live(), u64::MAX);

        device.free_memory(huge);
        assert!(device.allocate_memory(MemoryTypeIndex(1), 1).is_ok());
        assert_eq!(device.bytes_live(), 1);
    }
}
