#[cfg(test)]
pub(crate) mod mock;

use std::ffi::c_void;

use ash::{prelude::VkResult, vk};

/// A GPU object that needs device memory bound to it before it can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

impl From<vk::Buffer> for Resource {
    fn from(buffer: vk::Buffer) -> Self {
        Resource::Buffer(buffer)
    }
}

impl From<vk::Image> for Resource {
    fn from(image: vk::Image) -> Self {
        Resource::Image(image)
    }
}

/// The primitive device-memory operations the allocator is built on top of.
///
/// None of these are retried by the allocator; any error is reported to its caller as is.
pub trait MemoryDevice {
    /// Property flags of every memory type exposed by the device, indexed by memory type index.
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags>;

    fn memory_requirements(&self, resource: Resource) -> vk::MemoryRequirements;

    /// Allocates one coarse region of `size` bytes from the given memory type.
    fn allocate_region(&self, size: u64, memory_type_index: u32) -> VkResult<vk::DeviceMemory>;

    fn free_region(&self, region: vk::DeviceMemory) -> VkResult<()>;

    fn bind(&self, resource: Resource, region: vk::DeviceMemory, offset: u64) -> VkResult<()>;

    /// Makes `size` bytes starting at `offset` of `region` host-addressable.
    fn map(&self, region: vk::DeviceMemory, offset: u64, size: u64) -> VkResult<*mut c_void>;

    fn unmap(&self, region: vk::DeviceMemory);
}

/// [`MemoryDevice`] backed by a Vulkan logical device.
pub struct AshDevice {
    device: ash::Device,
    memory_props: vk::PhysicalDeviceMemoryProperties,
}

impl AshDevice {
    /// ## Safety
    /// `device` must have been created from `physical_device`, and must outlive the returned value
    /// and every region allocated through it.
    pub unsafe fn new(
        device: &ash::Device,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Self {
        let memory_props = instance.get_physical_device_memory_properties(physical_device);

        AshDevice {
            device: device.clone(),
            memory_props,
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl MemoryDevice for AshDevice {
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags> {
        self.memory_props.memory_types[..self.memory_props.memory_type_count as usize]
            .iter()
            .map(|memory_type| memory_type.property_flags)
            .collect()
    }

    fn memory_requirements(&self, resource: Resource) -> vk::MemoryRequirements {
        unsafe {
            match resource {
                Resource::Buffer(buffer) => self.device.get_buffer_memory_requirements(buffer),
                Resource::Image(image) => self.device.get_image_memory_requirements(image),
            }
        }
    }

    fn allocate_region(&self, size: u64, memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        unsafe {
            self.device.allocate_memory(
                &vk::MemoryAllocateInfo::builder()
                    .allocation_size(size)
                    .memory_type_index(memory_type_index),
                None,
            )
        }
    }

    fn free_region(&self, region: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.device.free_memory(region, None) };
        Ok(())
    }

    fn bind(&self, resource: Resource, region: vk::DeviceMemory, offset: u64) -> VkResult<()> {
        unsafe {
            match resource {
                Resource::Buffer(buffer) => self.device.bind_buffer_memory(buffer, region, offset),
                Resource::Image(image) => self.device.bind_image_memory(image, region, offset),
            }
        }
    }

    fn map(&self, region: vk::DeviceMemory, offset: u64, size: u64) -> VkResult<*mut c_void> {
        unsafe {
            self.device
                .map_memory(region, offset, size, vk::MemoryMapFlags::empty())
        }
    }

    fn unmap(&self, region: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(region) }
    }
}
