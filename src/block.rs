use std::{fmt, num::NonZeroU64, ops::Range};

/// Identifies a [`Block`] inside its owning [`Pool`](crate::Pool). Assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block #{}", self.0)
    }
}

/// A contiguous, aligned sub-range of a pool's region.
///
/// Blocks are only created by their pool and never change afterwards; they live until the pool is
/// torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    id: BlockId,
    origin: u64,
    size_class: NonZeroU64,
}

impl Block {
    pub(crate) fn new(id: BlockId, origin: u64, size_class: NonZeroU64) -> Self {
        debug_assert!(size_class.is_power_of_two());
        Self {
            id,
            origin,
            size_class,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Byte offset from the start of the pool's region.
    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn size_class(&self) -> NonZeroU64 {
        self.size_class
    }

    /// One past the last byte owned by this block.
    pub fn end(&self) -> u64 {
        self.origin + self.size_class.get()
    }

    pub fn range(&self) -> Range<u64> {
        self.origin..self.end()
    }
}
