use std::{fmt, num::NonZeroU64};

use ash::vk;
use serde::Deserialize;

use crate::{
    block::{Block, BlockId},
    config::{AllocatorConfig, PoolSelection},
    device::{MemoryDevice, Resource},
    error::{Error, Id, Result},
    pool::{Pool, PoolId},
    util::size_class,
};

/// Acts as the main allocation point for GPU memory.
///
/// Memory is obtained from the device in coarse regions, each backing one [`Pool`], and those are
/// then carved into [`Block`](crate::Block)s, one per bound resource. Callers only ever get
/// [`PoolId`]/[`BlockId`] pairs back; the allocator keeps ownership of every pool and block until
/// [`free_all_memory`](Self::free_all_memory) or drop.
pub struct Allocator<D: MemoryDevice> {
    device: D,
    config: AllocatorConfig,
    memory_types: Vec<vk::MemoryPropertyFlags>,

    /// Sorted by id, since ids only ever grow and pools are never reordered.
    pools: Vec<Pool>,
    next_pool_id: u32,
}

impl<D: MemoryDevice> Allocator<D> {
    pub fn new(device: D, config: AllocatorConfig) -> Self {
        let memory_types = device.memory_types();

        Allocator {
            device,
            config,
            memory_types,
            pools: vec![],
            next_pool_id: 0,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Pools in creation order.
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Returns the lowest memory type index that is allowed by `type_filter` and whose property flags
    /// contain `required_props`.
    pub fn get_memory_type_index(
        &self,
        type_filter: u32,
        required_props: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_suitable_memory_type(&self.memory_types, type_filter, required_props)
            .map(|(memory_type_index, _)| memory_type_index)
            .ok_or_else(|| Error::NoCompatibleMemoryType {
                type_filter,
                required: required_props,
                available: self.memory_types.clone(),
            })
    }

    /// Places `resource` in a block of a pool whose property flags are exactly `required_props`,
    /// creating a new pool if none of the existing ones can take it, and binds it there.
    ///
    /// On failure nothing is left behind: a block created for the resource is discarded and a pool
    /// created for it is freed.
    pub fn allocate_and_bind(
        &mut self,
        resource: Resource,
        required_props: vk::MemoryPropertyFlags,
    ) -> Result<GpuAllocation> {
        let requirements = self.device.memory_requirements(resource);
        let (size, alignment) = match (
            NonZeroU64::new(requirements.size),
            NonZeroU64::new(requirements.alignment),
        ) {
            (Some(size), Some(alignment)) => (size, alignment),
            _ => {
                return Err(Error::InvalidRequirements {
                    size: requirements.size,
                    alignment: requirements.alignment,
                })
            }
        };
        let size_class = size_class(size).ok_or(Error::SizeOverflow { size: size.get() })?;

        for index in self.suitable_pools(&requirements, required_props, size_class) {
            let pool = &mut self.pools[index];
            match pool.create_block(size_class, alignment, self.config.block_gap) {
                Ok(block) => {
                    if let Err(e) = pool.bind(&self.device, block.id(), resource) {
                        log::warn!("{}: discarding {} after failed bind", pool.id(), block.id());
                        pool.discard_last_block(block.id());
                        return Err(e);
                    }
                    return Ok(GpuAllocation::new(pool.id(), &block));
                }
                // Padding can make a block overrun a pool that looked big enough. Try the next one.
                Err(Error::InsufficientCapacity { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        // No existing pool can take this allocation, so we create a new one for it.
        let index = self.create_pool(requirements.memory_type_bits, required_props, size_class)?;
        let pool = &mut self.pools[index];
        let result = pool
            .create_block(size_class, alignment, self.config.block_gap)
            .and_then(|block| {
                pool.bind(&self.device, block.id(), resource)
                    .map(|()| GpuAllocation::new(pool.id(), &block))
            });

        match result {
            Ok(allocation) => Ok(allocation),
            Err(e) => {
                let pool = self.pools.remove(index);
                log::warn!("{}: freeing newly created pool after failure: {}", pool.id(), e);
                if let Err(free_error) = pool.free_region(&self.device) {
                    log::error!("could not free region after failed allocation: {free_error}");
                }
                Err(e)
            }
        }
    }

    /// Like [`allocate_and_bind`](Self::allocate_and_bind), but with property flags derived from
    /// `usage`. If the device has no memory with the preferred flags, the downlevel ones are tried.
    pub fn allocate_for_usage(
        &mut self,
        resource: Resource,
        usage: MemoryUsage,
    ) -> Result<GpuAllocation> {
        let preferred = usage.preferred_flags();
        let downlevel = usage.downlevel_flags();
        match self.allocate_and_bind(resource, preferred) {
            Err(Error::NoCompatibleMemoryType { .. }) if downlevel != preferred => {
                log::debug!("no memory for {usage:?}, falling back to {downlevel:?}");
                self.allocate_and_bind(resource, downlevel)
            }
            result => result,
        }
    }

    /// Indices of the pools a block of `size_class` could be placed in, in the order they should be
    /// tried.
    fn suitable_pools(
        &self,
        requirements: &vk::MemoryRequirements,
        required_props: vk::MemoryPropertyFlags,
        size_class: NonZeroU64,
    ) -> Vec<usize> {
        let mut suitable: Vec<usize> = self
            .pools
            .iter()
            .enumerate()
            .filter(|(_, pool)| {
                pool.get_free_memory() >= size_class.get()
                    && pool.is_compatible(requirements.memory_type_bits, required_props)
            })
            .map(|(index, _)| index)
            .collect();

        if self.config.selection == PoolSelection::BestFit {
            // Stable sort: ties stay in creation order.
            suitable.sort_by_key(|&index| self.pools[index].get_free_memory());
        }

        suitable
    }

    /// Allocates a new region big enough for `size_class` plus headroom and pushes a pool for it.
    /// Returns the index of the new pool.
    fn create_pool(
        &mut self,
        memory_type_bits: u32,
        required_props: vk::MemoryPropertyFlags,
        size_class: NonZeroU64,
    ) -> Result<usize> {
        let memory_type_index = self.get_memory_type_index(memory_type_bits, required_props)?;
        let capacity = size_class
            .checked_mul(self.config.pool_headroom)
            .ok_or(Error::SizeOverflow {
                size: size_class.get(),
            })?;

        let region = self
            .device
            .allocate_region(capacity.get(), memory_type_index)
            .map_err(|source| Error::RegionAllocationFailed {
                size: capacity.get(),
                memory_type_index,
                source,
            })?;

        let id = PoolId(self.next_pool_id);
        self.next_pool_id += 1;

        log::debug!(
            "{id}: allocated {}B on memory type {memory_type_index} ({required_props:?})",
            capacity
        );
        self.pools.push(Pool::new(
            id,
            region,
            capacity,
            memory_type_index,
            required_props,
            self.memory_types[memory_type_index as usize],
        ));
        Ok(self.pools.len() - 1)
    }

    pub fn get_pool_by_id(&self, id: PoolId) -> Result<&Pool> {
        find_pool(&self.pools, id).map(|index| &self.pools[index])
    }

    /// Maps `block` of pool `pool` into host memory until [`unmap`](Self::unmap) is called.
    ///
    /// Each pool has at most one block mapped at a time, and only pools on `HOST_VISIBLE` memory
    /// can be mapped.
    pub fn map(&mut self, pool: PoolId, block: BlockId) -> Result<*mut std::ffi::c_void> {
        let index = find_pool(&self.pools, pool)?;
        self.pools[index].map(&self.device, block)
    }

    pub fn unmap(&mut self, pool: PoolId) -> Result<()> {
        let index = find_pool(&self.pools, pool)?;
        self.pools[index].unmap(&self.device)
    }

    /// Copies `data` to the start of a host-visible block, mapping and unmapping it around the copy.
    pub fn write_block<T: Copy>(&mut self, pool: PoolId, block: BlockId, data: &[T]) -> Result<()> {
        let index = find_pool(&self.pools, pool)?;
        let size = self.pools[index].get_block_by_id(block)?.size_class().get();
        let len = std::mem::size_of_val(data) as u64;
        if len > size {
            return Err(Error::WriteOutOfBounds {
                pool,
                block,
                len,
                size,
            });
        }

        let mapped = self.pools[index].map(&self.device, block)?;
        // SAFETY: The mapped range spans the whole block, which we checked is big enough for `data`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr() as *const u8,
                mapped as *mut u8,
                len as usize,
            );
        }
        self.pools[index].unmap(&self.device)
    }

    pub fn stats(&self) -> AllocatorStats {
        self.pools
            .iter()
            .fold(AllocatorStats::default(), |stats, pool| AllocatorStats {
                pools: stats.pools + 1,
                blocks: stats.blocks + pool.blocks().len(),
                capacity: stats.capacity + pool.capacity().get(),
                occupied: stats.occupied + pool.occupied(),
            })
    }

    /// Tears every pool down: first its blocks, then its region.
    ///
    /// Failures are collected in the returned report but do not stop the sweep, so that every region
    /// that can be freed is.
    pub fn free_all_memory(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for mut pool in self.pools.drain(..) {
            let id = pool.id();
            report.blocks_freed += pool.free_blocks();
            match pool.free_region(&self.device) {
                Ok(()) => {
                    log::debug!("{id}: freed");
                    report.pools_freed += 1;
                }
                Err(source) => {
                    log::error!("{id}: could not free region: {source}");
                    report.failures.push(TeardownFailure { pool: id, source });
                }
            }
        }

        report
    }
}

impl<D: MemoryDevice> Drop for Allocator<D> {
    fn drop(&mut self) {
        if self.pools.is_empty() {
            return;
        }

        let report = self.free_all_memory();
        if report.failed() {
            log::error!("leaked memory while dropping allocator: {report}");
        }
    }
}

fn find_pool(pools: &[Pool], id: PoolId) -> Result<usize> {
    pools
        .binary_search_by_key(&id, Pool::id)
        .map_err(|_| Error::NotFound(Id::Pool(id)))
}

/// Walks `memory_types` in index order and returns the first entry allowed by `required_type_bits`
/// whose flags contain `required_props`, along with its index. Types past bit 31 cannot be selected
/// by a filter and are ignored.
fn find_suitable_memory_type(
    memory_types: &[vk::MemoryPropertyFlags],
    required_type_bits: u32,
    required_props: vk::MemoryPropertyFlags,
) -> Option<(u32, vk::MemoryPropertyFlags)> {
    (0..memory_types.len().min(u32::BITS as usize) as u32).find_map(|memory_type_idx| {
        let type_bits = 1 << memory_type_idx;
        let is_required_type = (required_type_bits & type_bits) != 0;
        let props = memory_types[memory_type_idx as usize];
        let has_required_props = props.contains(required_props);

        (is_required_type && has_required_props).then_some((memory_type_idx, props))
    })
}

/// Where a resource ended up after [`Allocator::allocate_and_bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuAllocation {
    pub pool: PoolId,
    pub block: BlockId,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl GpuAllocation {
    fn new(pool: PoolId, block: &Block) -> Self {
        GpuAllocation {
            pool,
            block: block.id(),
            offset: block.origin(),
            size: block.size_class().get(),
        }
    }
}

/// How a resource's memory is going to be accessed, used by [`Allocator::allocate_for_usage`] to
/// pick property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryUsage {
    /// Only ever touched by the device.
    Gpu,
    /// Written by the host, read by the device. Staging and uniform buffers.
    CpuToGpu,
    /// Written by the device, read back by the host.
    GpuToCpu,
}

impl MemoryUsage {
    const HOST_ACCESS: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    /// The flags to ask for first.
    pub fn preferred_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryUsage::Gpu => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUsage::CpuToGpu => Self::HOST_ACCESS | vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUsage::GpuToCpu => Self::HOST_ACCESS | vk::MemoryPropertyFlags::HOST_CACHED,
        }
    }

    /// The flags to settle for when no memory type has the [preferred](Self::preferred_flags) ones.
    /// Host access is kept, locality and caching are given up.
    pub fn downlevel_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryUsage::Gpu => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUsage::CpuToGpu | MemoryUsage::GpuToCpu => Self::HOST_ACCESS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub pools: usize,
    pub blocks: usize,
    pub capacity: u64,
    pub occupied: u64,
}

impl AllocatorStats {
    pub fn free(&self) -> u64 {
        self.capacity - self.occupied
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pool(s), {} block(s), {}B occupied out of {}B ({}B free)",
            self.pools,
            self.blocks,
            self.occupied,
            self.capacity,
            self.free()
        )
    }
}

#[derive(Debug)]
pub struct TeardownFailure {
    pub pool: PoolId,
    pub source: vk::Result,
}

/// Outcome of [`Allocator::free_all_memory`].
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub pools_freed: usize,
    pub blocks_freed: usize,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.failed() {
            Err(Error::Teardown(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "freed {} pool(s) and {} block(s)",
            self.pools_freed, self.blocks_freed
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.pool, failure.source)?;
        }
        Ok(())
    }
}
