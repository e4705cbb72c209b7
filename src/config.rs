use std::num::NonZeroU64;

use nonzero_ext::nonzero;
use serde::Deserialize;

/// How [`Allocator`](crate::Allocator) picks among several pools that can take an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSelection {
    /// The suitable pool that was created first.
    #[default]
    FirstFit,
    /// The suitable pool with the least free memory left. Ties go to the pool created first.
    BestFit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// New pools are this many times bigger than the size class of the request that created them.
    pub pool_headroom: NonZeroU64,
    /// Bytes left between the end of a block and the origin of the next one, before alignment.
    pub block_gap: u64,
    pub selection: PoolSelection,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            pool_headroom: nonzero!(8u64),
            block_gap: 1,
            selection: PoolSelection::FirstFit,
        }
    }
}
