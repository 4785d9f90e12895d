//! Vulkan backend for [MemoryPool](super::MemoryPool), built on `ash`.

use ash::vk;

use super::device::MemoryDevice;
use super::error::DeviceError;
use super::types::{
    MemoryHeap, MemoryProperties, MemoryPropertyFlags, MemoryRequirements, MemoryType,
    MemoryTypeIndex,
};

impl From<vk::Result> for DeviceError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => DeviceError::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DeviceError::OutOfDeviceMemory,
            vk::Result::ERROR_TOO_MANY_OBJECTS => DeviceError::TooManyObjects,
            other => DeviceError::Other(other.as_raw()),
        }
    }
}

impl From<vk::MemoryRequirements> for MemoryRequirements {
    fn from(requirements: vk::MemoryRequirements) -> Self {
        MemoryRequirements::new(
            requirements.size,
            requirements.alignment,
            requirements.memory_type_bits,
        )
    }
}

/// Allocates straight from a Vulkan logical device.
///
/// Keeps clones of the instance and device function tables but does not own the handles behind
/// them. The application must drop every pool using this before destroying the device.
pub struct AshDevice {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
}

impl AshDevice {
    /// # Safety
    ///
    /// `device` must have been created from `physical_device`, which must belong to `instance`,
    /// and all three must stay valid for as long as this value is used.
    pub unsafe fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Self {
        AshDevice { instance, physical_device, device }
    }

    #[inline]
    pub fn logical_device(&self) -> &ash::Device {
        &self.device
    }

    /// What the device needs to back `buffer`. `buffer` must have been created on this device.
    pub fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }.into()
    }

    /// What the device needs to back `image`. `image` must have been created on this device.
    pub fn image_memory_requirements(&self, image: vk::Image) -> MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }.into()
    }
}

impl MemoryDevice for AshDevice {
    type Memory = vk::DeviceMemory;

    fn memory_properties(&self) -> MemoryProperties {
        let raw = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };
        let type_count = (raw.memory_type_count as usize).min(raw.memory_types.len());
        let heap_count = (raw.memory_heap_count as usize).min(raw.memory_heaps.len());
        MemoryProperties {
            memory_types: raw.memory_types[..type_count]
                .iter()
                .map(|ty| {
                    let flags = MemoryPropertyFlags::from_bits_truncate(ty.property_flags.as_raw());
                    MemoryType::new(flags, ty.heap_index)
                })
                .collect(),
            memory_heaps: raw.memory_heaps[..heap_count]
                .iter()
                .map(|heap| MemoryHeap {
                    size: heap.size,
                    device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
                })
                .collect(),
        }
    }

    fn allocate_memory(
        &self,
        type_index: MemoryTypeIndex,
        size: u64,
    ) -> Result<vk::DeviceMemory, DeviceError> {
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(type_index.0);
        unsafe { self.device.allocate_memory(&allocate_info, None) }.map_err(DeviceError::from)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }
}
