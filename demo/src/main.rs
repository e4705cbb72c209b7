mod cx;

use std::fs;

use anyhow::Context;
use ash::vk;
use serde::Deserialize;
use vkpool::{Allocator, AllocatorConfig, AshDevice, MemoryUsage};

#[derive(Debug, Deserialize)]
struct Requests {
    #[serde(default)]
    config: AllocatorConfig,
    buffers: Vec<BufferRequest>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct BufferRequest {
    size: u64,
    usage: MemoryUsage,
}

impl Default for Requests {
    fn default() -> Self {
        Requests {
            config: AllocatorConfig::default(),
            buffers: [64, 200, 4000]
                .map(|size| BufferRequest {
                    size,
                    usage: MemoryUsage::CpuToGpu,
                })
                .to_vec(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let requests = match std::env::args().nth(1) {
        Some(path) => {
            let json =
                fs::read_to_string(&path).with_context(|| format!("could not read {path}"))?;
            serde_json::from_str(&json).with_context(|| format!("could not parse {path}"))?
        }
        None => Requests::default(),
    };

    unsafe { run(requests) }
}

unsafe fn run(requests: Requests) -> anyhow::Result<()> {
    let cx = cx::Cx::new()?;
    let mut allocator = Allocator::new(
        AshDevice::new(&cx.device, &cx.instance, cx.physical_device),
        requests.config,
    );
    let mut buffers = vec![];

    let result = allocate_all(&cx, &mut allocator, &requests.buffers, &mut buffers);
    println!("{}", allocator.stats());

    for buffer in buffers {
        cx.device.destroy_buffer(buffer, None);
    }
    let report = allocator.free_all_memory();
    println!("{report}");

    result.and(report.into_result().map_err(Into::into))
}

unsafe fn allocate_all(
    cx: &cx::Cx,
    allocator: &mut Allocator<AshDevice>,
    requests: &[BufferRequest],
    buffers: &mut Vec<vk::Buffer>,
) -> anyhow::Result<()> {
    for request in requests {
        let buffer = cx.device.create_buffer(
            &vk::BufferCreateInfo::builder()
                .size(request.size)
                .usage(vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::UNIFORM_BUFFER)
                .sharing_mode(vk::SharingMode::EXCLUSIVE),
            None,
        )?;
        buffers.push(buffer);

        let allocation = allocator.allocate_for_usage(buffer.into(), request.usage)?;
        log::info!(
            "{}B ({:?}) -> {}/{} at offset {} ({}B)",
            request.size,
            request.usage,
            allocation.pool,
            allocation.block,
            allocation.offset,
            allocation.size
        );

        let host_visible = allocator
            .get_pool_by_id(allocation.pool)?
            .memory_type_flags()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        if host_visible {
            let pattern = vec![0xabu8; request.size as usize];
            allocator.write_block(allocation.pool, allocation.block, &pattern)?;
        }
    }

    Ok(())
}
