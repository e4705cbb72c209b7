//! GPU memory sub-allocation.
//!
//! An [`Allocator`] requests a few big regions from the device and carves them into aligned,
//! non-overlapping blocks, one per buffer or image bound through it. Individual blocks are never
//! reclaimed; memory is given back all at once through [`Allocator::free_all_memory`] (or on drop).

mod allocator;
mod block;
mod config;
mod device;
mod error;
mod pool;
pub mod util;

pub use ash;

pub use allocator::{
    Allocator, AllocatorStats, GpuAllocation, MemoryUsage, TeardownFailure, TeardownReport,
};
pub use block::{Block, BlockId};
pub use config::{AllocatorConfig, PoolSelection};
pub use device::{AshDevice, MemoryDevice, Resource};
pub use error::{Error, Id, Result};
pub use pool::{Pool, PoolId};
