use ash::vk;
use cstr::cstr;

/// Headless Vulkan context: just enough to create buffers and allocate memory.
pub struct Cx {
    _entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
}

impl Cx {
    pub unsafe fn new() -> anyhow::Result<Self> {
        let entry = ash::Entry::load()?;

        let instance = entry.create_instance(
            &vk::InstanceCreateInfo::builder().application_info(
                &vk::ApplicationInfo::builder()
                    .application_name(cstr!("vkpool demo"))
                    .application_version(0)
                    .engine_name(cstr!("vkpool"))
                    .engine_version(0)
                    .api_version(vk::API_VERSION_1_0),
            ),
            None,
        )?;

        let physical_device = match instance
            .enumerate_physical_devices()?
            .into_iter()
            .max_by_key(|&physical_device| -> u64 {
                // pick GPU by the greatest local memory
                instance
                    .get_physical_device_memory_properties(physical_device)
                    .memory_heaps
                    .iter()
                    .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                    .map(|heap| heap.size)
                    .sum()
            }) {
            Some(physical_device) => physical_device,
            None => {
                instance.destroy_instance(None);
                return Err(anyhow::anyhow!("no GPUs on this system"));
            }
        };

        // Memory allocation needs no particular queue, any family will do.
        let device = instance.create_device(
            physical_device,
            &vk::DeviceCreateInfo::builder().queue_create_infos(&[
                *vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(0)
                    .queue_priorities(&[1.]),
            ]),
            None,
        );
        let device = match device {
            Ok(device) => device,
            Err(e) => {
                instance.destroy_instance(None);
                return Err(e.into());
            }
        };

        Ok(Cx {
            _entry: entry,
            instance,
            physical_device,
            device,
        })
    }
}

impl Drop for Cx {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
