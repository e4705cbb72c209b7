//! In-memory [`MemoryDevice`] used by the unit tests.
//!
//! Regions are plain host byte vectors, and every bind is checked against the resource's
//! requirements so that misplaced blocks show up as bind errors.

use std::{
    cell::{Cell, RefCell},
    ffi::c_void,
    rc::Rc,
};

use ahash::AHashMap;
use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};

use super::{MemoryDevice, Resource};

pub(crate) fn device_local() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::DEVICE_LOCAL
}

pub(crate) fn host_visible() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
}

struct MockRegion {
    memory_type_index: u32,
    bytes: Vec<u8>,
    mapped: bool,
}

#[derive(Default)]
pub(crate) struct MockDevice {
    memory_types: Vec<vk::MemoryPropertyFlags>,
    requirements: RefCell<AHashMap<Resource, vk::MemoryRequirements>>,
    next_handle: Cell<u64>,
    regions: RefCell<AHashMap<u64, MockRegion>>,
    pub binds: RefCell<Vec<(Resource, vk::DeviceMemory, u64)>>,
    pub allocations: Cell<usize>,
    /// Shared so it can still be read after the device is dropped along with its allocator.
    pub freed: Rc<Cell<usize>>,

    pub fail_allocate: Cell<bool>,
    pub fail_bind: Cell<bool>,
    pub fail_free: Cell<bool>,
    pub fail_map: Cell<bool>,
}

impl MockDevice {
    pub fn new(memory_types: Vec<vk::MemoryPropertyFlags>) -> Self {
        MockDevice {
            memory_types,
            ..Default::default()
        }
    }

    fn next_handle(&self) -> u64 {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        handle
    }

    /// Registers a fake buffer with the given memory requirements.
    pub fn create_buffer(&self, size: u64, alignment: u64, memory_type_bits: u32) -> Resource {
        let resource = Resource::Buffer(vk::Buffer::from_raw(self.next_handle()));
        self.requirements.borrow_mut().insert(
            resource,
            vk::MemoryRequirements {
                size,
                alignment,
                memory_type_bits,
            },
        );
        resource
    }

    pub fn create_image(&self, size: u64, alignment: u64, memory_type_bits: u32) -> Resource {
        let resource = Resource::Image(vk::Image::from_raw(self.next_handle()));
        self.requirements.borrow_mut().insert(
            resource,
            vk::MemoryRequirements {
                size,
                alignment,
                memory_type_bits,
            },
        );
        resource
    }

    /// Number of regions allocated and not yet freed.
    pub fn live_regions(&self) -> usize {
        self.regions.borrow().len()
    }

    pub fn region_size(&self, region: vk::DeviceMemory) -> Option<u64> {
        self.regions
            .borrow()
            .get(&region.as_raw())
            .map(|region| region.bytes.len() as u64)
    }

    pub fn region_memory_type(&self, region: vk::DeviceMemory) -> Option<u32> {
        self.regions
            .borrow()
            .get(&region.as_raw())
            .map(|region| region.memory_type_index)
    }

    pub fn is_mapped(&self, region: vk::DeviceMemory) -> bool {
        self.regions
            .borrow()
            .get(&region.as_raw())
            .map_or(false, |region| region.mapped)
    }

    pub fn read(&self, region: vk::DeviceMemory, offset: u64, len: usize) -> Vec<u8> {
        let regions = self.regions.borrow();
        let bytes = &regions[&region.as_raw()].bytes;
        bytes[offset as usize..offset as usize + len].to_vec()
    }
}

impl MemoryDevice for MockDevice {
    fn memory_types(&self) -> Vec<vk::MemoryPropertyFlags> {
        self.memory_types.clone()
    }

    fn memory_requirements(&self, resource: Resource) -> vk::MemoryRequirements {
        self.requirements
            .borrow()
            .get(&resource)
            .copied()
            .unwrap_or_default()
    }

    fn allocate_region(&self, size: u64, memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        if self.fail_allocate.get() || memory_type_index as usize >= self.memory_types.len() {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }

        let handle = self.next_handle();
        self.regions.borrow_mut().insert(
            handle,
            MockRegion {
                memory_type_index,
                bytes: vec![0; size as usize],
                mapped: false,
            },
        );
        self.allocations.set(self.allocations.get() + 1);
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_region(&self, region: vk::DeviceMemory) -> VkResult<()> {
        if self.fail_free.get() {
            return Err(vk::Result::ERROR_UNKNOWN);
        }

        self.regions
            .borrow_mut()
            .remove(&region.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        self.freed.set(self.freed.get() + 1);
        Ok(())
    }

    fn bind(&self, resource: Resource, region: vk::DeviceMemory, offset: u64) -> VkResult<()> {
        if self.fail_bind.get() {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }

        let requirements = self.memory_requirements(resource);
        let regions = self.regions.borrow();
        let region_data = regions
            .get(&region.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;

        let type_ok = requirements.memory_type_bits & (1 << region_data.memory_type_index) != 0;
        let aligned = offset % requirements.alignment.max(1) == 0;
        let fits = offset + requirements.size <= region_data.bytes.len() as u64;
        if !(type_ok && aligned && fits) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }

        self.binds.borrow_mut().push((resource, region, offset));
        Ok(())
    }

    fn map(&self, region: vk::DeviceMemory, offset: u64, size: u64) -> VkResult<*mut c_void> {
        if self.fail_map.get() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }

        let mut regions = self.regions.borrow_mut();
        let region = regions
            .get_mut(&region.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let host_visible = self.memory_types[region.memory_type_index as usize]
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        if region.mapped || !host_visible || offset + size > region.bytes.len() as u64 {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }

        region.mapped = true;
        Ok(unsafe { region.bytes.as_mut_ptr().add(offset as usize) } as *mut c_void)
    }

    fn unmap(&self, region: vk::DeviceMemory) {
        if let Some(region) = self.regions.borrow_mut().get_mut(&region.as_raw()) {
            region.mapped = false;
        }
    }
}
