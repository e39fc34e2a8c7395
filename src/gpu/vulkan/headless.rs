use ash::{vk, Entry};
use log::{debug, info};

use super::{VulkanDevice, VulkanDeviceInfo};
use crate::gpu::{ContextInfo, GPUError, QueueFamily, Result};

impl VulkanDevice {
    /// Brings up an instance and logical device with no surface.
    ///
    /// Picks the first physical device with a graphics queue. A family with
    /// transfer but no graphics support becomes the async transfer family.
    pub fn headless() -> Result<(Self, ContextInfo)> {
        let entry = unsafe { Entry::load() }
            .map_err(|err| GPUError::Backend(format!("loading Vulkan: {}", err)))?;

        let app_info = vk::ApplicationInfo {
            api_version: vk::make_api_version(0, 1, 2, 0),
            ..Default::default()
        };
        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .build(),
                None,
            )
        }?;

        let picked = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .find_map(|pdevice| {
                let families =
                    unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
                let graphics = families
                    .iter()
                    .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
                let transfer = families.iter().position(|f| {
                    f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                        && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                });

                let family = |idx: usize| QueueFamily {
                    index: idx as u32,
                    queue_count: families[idx].queue_count.min(crate::gpu::MAX_QUEUES as u32),
                };
                Some((
                    pdevice,
                    ContextInfo {
                        graphics: family(graphics),
                        transfer: transfer.map(family),
                    },
                ))
            });

        let (pdevice, ctx_info) = match picked {
            Some(found) => found,
            None => {
                unsafe { instance.destroy_instance(None) };
                return Err(GPUError::UnsupportedConfiguration(
                    "no device with a graphics queue".to_string(),
                ));
            }
        };

        let priorities = [1.0f32; crate::gpu::MAX_QUEUES];
        let mut families = vec![ctx_info.graphics];
        families.extend(ctx_info.transfer);
        let queue_infos: Vec<_> = families
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family.index)
                    .queue_priorities(&priorities[..family.queue_count as usize])
                    .build()
            })
            .collect();

        let device = match unsafe {
            instance.create_device(
                pdevice,
                &vk::DeviceCreateInfo::builder()
                    .queue_create_infos(&queue_infos)
                    .build(),
                None,
            )
        } {
            Ok(device) => device,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err.into());
            }
        };
        debug!(
            "Headless device with graphics family {} and transfer family {:?}",
            ctx_info.graphics.index,
            ctx_info.transfer.map(|f| f.index)
        );

        let device = Self::assemble(
            VulkanDeviceInfo {
                entry,
                instance,
                physical_device: pdevice,
                device,
                surface: None,
            },
            true,
        )?;
        info!("Created headless Vulkan device");
        Ok((device, ctx_info))
    }
}
