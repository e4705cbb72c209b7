use std::{ffi::c_void, fmt, num::NonZeroU64};

use ash::{prelude::VkResult, vk};

use crate::{
    block::{Block, BlockId},
    device::{MemoryDevice, Resource},
    error::{Error, Id, Result},
    util::align_up,
};

/// Identifies a [`Pool`] inside its [`Allocator`](crate::Allocator). Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId(pub(crate) u32);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool #{}", self.0)
    }
}

/// One coarse device memory region, carved front to back into [`Block`]s.
///
/// Blocks are never given back individually: the only way to reclaim the space is tearing the whole
/// pool down, which only the owning [`Allocator`](crate::Allocator) can do. Outside the crate a pool
/// is read-only.
#[derive(Debug)]
pub struct Pool {
    id: PoolId,
    region: vk::DeviceMemory,
    capacity: NonZeroU64,
    /// End of the last block, including any gap and alignment padding before it.
    occupied: u64,
    memory_type_index: u32,
    /// The property flags that were requested when the region was allocated.
    property_flags: vk::MemoryPropertyFlags,
    /// The property flags the memory type actually has. Always a superset of `property_flags`.
    memory_type_flags: vk::MemoryPropertyFlags,
    blocks: Vec<Block>,
    mapped: Option<BlockId>,
}

impl Pool {
    pub(crate) fn new(
        id: PoolId,
        region: vk::DeviceMemory,
        capacity: NonZeroU64,
        memory_type_index: u32,
        property_flags: vk::MemoryPropertyFlags,
        memory_type_flags: vk::MemoryPropertyFlags,
    ) -> Self {
        Pool {
            id,
            region,
            capacity,
            occupied: 0,
            memory_type_index,
            property_flags,
            memory_type_flags,
            blocks: vec![],
            mapped: None,
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Returns the underlying [vk::DeviceMemory].
    ///
    /// The returned handle must not be freed, as the pool already does that on teardown.
    pub fn region(&self) -> vk::DeviceMemory {
        self.region
    }

    pub fn capacity(&self) -> NonZeroU64 {
        self.capacity
    }

    pub fn occupied(&self) -> u64 {
        self.occupied
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    pub fn property_flags(&self) -> vk::MemoryPropertyFlags {
        self.property_flags
    }

    pub fn memory_type_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_type_flags
    }

    /// Blocks in creation order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The block currently mapped into host memory, if any.
    pub fn mapped(&self) -> Option<BlockId> {
        self.mapped
    }

    pub fn get_free_memory(&self) -> u64 {
        self.capacity.get() - self.occupied
    }

    pub fn get_block_by_id(&self, id: BlockId) -> Result<&Block> {
        self.blocks
            .get(id.index())
            .ok_or(Error::NotFound(Id::Block(self.id, id)))
    }

    /// Whether a resource accepting `memory_type_bits` and asking for exactly `property_flags` may
    /// live in this pool. Free space is not taken into account.
    pub fn is_compatible(
        &self,
        memory_type_bits: u32,
        property_flags: vk::MemoryPropertyFlags,
    ) -> bool {
        let type_ok = 1u32
            .checked_shl(self.memory_type_index)
            .map_or(false, |type_bit| memory_type_bits & type_bit != 0);

        type_ok && self.property_flags == property_flags
    }

    /// Computes where a block of `size_class` bytes aligned to `alignment` would be placed, without
    /// reserving it.
    ///
    /// The first block always goes at offset 0. Every other block goes `gap` bytes after the end of
    /// the previous one, rounded up to `alignment`.
    pub fn placement(
        &self,
        size_class: NonZeroU64,
        alignment: NonZeroU64,
        gap: u64,
    ) -> Result<u64> {
        let origin = if self.blocks.is_empty() {
            Some(0)
        } else {
            self.occupied
                .checked_add(gap)
                .and_then(|offset| align_up(offset, alignment))
        };

        match origin {
            Some(origin)
                if origin
                    .checked_add(size_class.get())
                    .map_or(false, |end| end <= self.capacity.get()) =>
            {
                Ok(origin)
            }
            _ => Err(Error::InsufficientCapacity {
                pool: self.id,
                origin: origin.unwrap_or(u64::MAX),
                size: size_class.get(),
                capacity: self.capacity.get(),
            }),
        }
    }

    /// Carves a new block of `size_class` bytes out of the free tail of the region.
    ///
    /// Fails with [`Error::InsufficientCapacity`] without modifying the pool if the block would not
    /// fit.
    pub(crate) fn create_block(
        &mut self,
        size_class: NonZeroU64,
        alignment: NonZeroU64,
        gap: u64,
    ) -> Result<Block> {
        let origin = self.placement(size_class, alignment, gap)?;

        let id = BlockId(self.blocks.len() as u32);
        let block = Block::new(id, origin, size_class);
        self.occupied = block.end();
        self.blocks.push(block);

        log::trace!(
            "{}: created {} at {}..{} ({}B free)",
            self.id,
            id,
            block.origin(),
            block.end(),
            self.get_free_memory()
        );
        Ok(block)
    }

    /// Undoes the [`create_block`](Self::create_block) call that returned block `id`, as long as no other
    /// block was created after it.
    pub(crate) fn discard_last_block(&mut self, id: BlockId) {
        if self.blocks.last().map(Block::id) == Some(id) {
            self.blocks.pop();
            self.occupied = self.blocks.last().map_or(0, Block::end);
        }
    }

    /// Binds `resource` to the byte range owned by `block`.
    pub(crate) fn bind<D: MemoryDevice + ?Sized>(
        &self,
        device: &D,
        block: BlockId,
        resource: Resource,
    ) -> Result<()> {
        let origin = self.get_block_by_id(block)?.origin();
        device
            .bind(resource, self.region, origin)
            .map_err(|source| Error::BindFailure {
                pool: self.id,
                block,
                source,
            })?;

        log::trace!("{}: bound {:?} to {}", self.id, resource, block);
        Ok(())
    }

    /// Maps the byte range of `block` into host memory until [`unmap`](Self::unmap) is called.
    ///
    /// Only one block per pool can be mapped at a time.
    pub(crate) fn map<D: MemoryDevice + ?Sized>(
        &mut self,
        device: &D,
        block: BlockId,
    ) -> Result<*mut c_void> {
        if let Some(mapped) = self.mapped {
            return Err(Error::AlreadyMapped {
                pool: self.id,
                block: mapped,
            });
        }

        let (origin, size) = {
            let block = self.get_block_by_id(block)?;
            (block.origin(), block.size_class().get())
        };

        if !self
            .memory_type_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(Error::MapFailure {
                pool: self.id,
                block,
                source: vk::Result::ERROR_MEMORY_MAP_FAILED,
            });
        }

        let ptr = device
            .map(self.region, origin, size)
            .map_err(|source| Error::MapFailure {
                pool: self.id,
                block,
                source,
            })?;
        self.mapped = Some(block);

        log::trace!("{}: mapped {}", self.id, block);
        Ok(ptr)
    }

    pub(crate) fn unmap<D: MemoryDevice + ?Sized>(&mut self, device: &D) -> Result<()> {
        let block = self.mapped.take().ok_or(Error::NotMapped { pool: self.id })?;
        device.unmap(self.region);

        log::trace!("{}: unmapped {}", self.id, block);
        Ok(())
    }

    /// Releases the bookkeeping of every block. Has no effect on the device.
    ///
    /// Returns how many blocks were released.
    pub(crate) fn free_blocks(&mut self) -> usize {
        let count = self.blocks.len();
        self.blocks.clear();
        self.occupied = 0;
        count
    }

    /// Gives the region back to the device, unmapping it first if needed.
    pub(crate) fn free_region<D: MemoryDevice + ?Sized>(mut self, device: &D) -> VkResult<()> {
        if self.mapped.take().is_some() {
            device.unmap(self.region);
        }
        device.free_region(self.region)
    }
}
