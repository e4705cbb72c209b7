use ash::vk;
use thiserror::Error;

use crate::{BlockId, PoolId, TeardownReport};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "no compatible memory on GPU: type filter {type_filter:#b} with {required:?} \
        (exposed memory types: {available:?})"
    )]
    NoCompatibleMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
        available: Vec<vk::MemoryPropertyFlags>,
    },

    #[error("could not allocate a region of {size}B on memory type {memory_type_index}")]
    RegionAllocationFailed {
        size: u64,
        memory_type_index: u32,
        #[source]
        source: vk::Result,
    },

    /// A block of `size`B placed at `origin` would overrun the pool's capacity.
    ///
    /// Only ever seen by the allocator itself, which reacts by trying another pool.
    #[error("{pool}: a block of {size}B at offset {origin} does not fit in {capacity}B")]
    InsufficientCapacity {
        pool: PoolId,
        origin: u64,
        size: u64,
        capacity: u64,
    },

    #[error("could not bind resource to {pool}/{block}")]
    BindFailure {
        pool: PoolId,
        block: BlockId,
        #[source]
        source: vk::Result,
    },

    #[error("could not map {pool}/{block}")]
    MapFailure {
        pool: PoolId,
        block: BlockId,
        #[source]
        source: vk::Result,
    },

    #[error("{pool} is already mapped at {block}")]
    AlreadyMapped { pool: PoolId, block: BlockId },

    #[error("{pool} is not mapped")]
    NotMapped { pool: PoolId },

    #[error("{0} not found")]
    NotFound(Id),

    #[error("invalid memory requirements (size: {size}, alignment: {alignment})")]
    InvalidRequirements { size: u64, alignment: u64 },

    #[error("size class of a {size}B requirement overflows")]
    SizeOverflow { size: u64 },

    #[error("tried to write {len}B into {pool}/{block} of {size}B")]
    WriteOutOfBounds {
        pool: PoolId,
        block: BlockId,
        len: u64,
        size: u64,
    },

    #[error("{} pool(s) could not be freed", .0.failures.len())]
    Teardown(TeardownReport),
}

/// The identifier of something that could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Id {
    Pool(PoolId),
    Block(PoolId, BlockId),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Pool(pool) => write!(f, "{pool}"),
            Id::Block(pool, block) => write!(f, "{pool}/{block}"),
        }
    }
}
