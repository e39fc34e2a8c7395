//! [`Device`] on top of `ash`, with memory from `vk-mem`.
//!
//! Instance, device and surface creation normally happen elsewhere; a
//! [`VulkanDevice`] is assembled from the negotiated handles and only owns
//! what it allocates itself. [`VulkanDevice::headless`] is the exception and
//! brings up its own instance for offscreen work.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::rc::Rc;
use std::time::Duration;

use ash::extensions::khr;
use ash::vk;
use log::{debug, error, trace, warn};
use vk_mem::Alloc;

mod conversions;
mod headless;
mod timing;

use conversions::*;
pub use timing::VulkanTimer;

use super::{
    BufferShape, BufferTextureCopy, Device, Format, FormatCaps, GPUError, PresentMode,
    QueueFamily, Result, Submission, SurfaceCapabilities, SwapchainCreateInfo, TextureInfo,
};

/// Surface formats tried in order when picking the presentation format.
const SURFACE_FORMATS: [Format; 5] = [
    Format::BGRA8Unorm,
    Format::RGBA8Unorm,
    Format::A2BGR10,
    Format::BGRA8Srgb,
    Format::RGBA8Srgb,
];

/// Handles produced by device negotiation.
pub struct VulkanDeviceInfo {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    /// `None` for headless use. Presentation calls then fail.
    pub surface: Option<vk::SurfaceKHR>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VulkanTexture {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

struct BufferRecord {
    alloc: vk_mem::Allocation,
    shape: BufferShape,
}

struct TextureRecord {
    /// `None` for swapchain images, which belong to the chain.
    alloc: Option<vk_mem::Allocation>,
    view: vk::ImageView,
    extent: [u32; 2],
    format: Format,
    layout: vk::ImageLayout,
}

struct Inner {
    _entry: ash::Entry,
    instance: ash::Instance,
    pdevice: vk::PhysicalDevice,
    device: ash::Device,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
    surface: Option<vk::SurfaceKHR>,
    surface_format: vk::SurfaceFormatKHR,
    format: Format,
    timestamp_period: f32,
    timestamps: bool,
    command_pools: RefCell<HashMap<u32, vk::CommandPool>>,
    buffers: RefCell<HashMap<vk::Buffer, BufferRecord>>,
    textures: RefCell<HashMap<vk::Image, TextureRecord>>,
    /// Set when the device and instance were created by [`VulkanDevice::headless`].
    owns_device: bool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        unsafe {
            for (_, pool) in self.command_pools.get_mut().drain() {
                self.device.destroy_command_pool(pool, None);
            }
            for (buffer, mut record) in self.buffers.get_mut().drain() {
                self.allocator.destroy_buffer(buffer, &mut record.alloc);
            }
            for (image, record) in self.textures.get_mut().drain() {
                self.device.destroy_image_view(record.view, None);
                if let Some(mut alloc) = record.alloc {
                    self.allocator.destroy_image(image, &mut alloc);
                }
            }
            ManuallyDrop::drop(&mut self.allocator);
            if self.owns_device {
                self.device.destroy_device(None);
                self.instance.destroy_instance(None);
            }
        }
    }
}

/// Cheap handle to a Vulkan logical device. Clones share all state.
#[derive(Clone)]
pub struct VulkanDevice {
    inner: Rc<Inner>,
}

fn pick_surface_format(
    loader: &khr::Surface,
    pdevice: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<(vk::SurfaceFormatKHR, Format)> {
    let formats = unsafe { loader.get_physical_device_surface_formats(pdevice, surface)? };

    for wanted in SURFACE_FORMATS {
        let raw = lib_to_vk_image_format(&wanted);
        if let Some(found) = formats.iter().find(|f| {
            f.format == raw && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            return Ok((*found, wanted));
        }
    }

    for found in &formats {
        if let Ok(format) = vk_to_lib_image_format(found.format) {
            return Ok((*found, format));
        }
    }

    Err(GPUError::UnsupportedConfiguration(
        "no usable surface format".to_string(),
    ))
}

impl VulkanDevice {
    pub fn new(info: VulkanDeviceInfo) -> Result<Self> {
        Self::assemble(info, false)
    }

    fn assemble(info: VulkanDeviceInfo, owns_device: bool) -> Result<Self> {
        let VulkanDeviceInfo {
            entry,
            instance,
            physical_device: pdevice,
            device,
            surface,
        } = info;

        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        debug!("Using Vulkan device {}", name.to_string_lossy());

        let surface_loader = khr::Surface::new(&entry, &instance);
        let swapchain_loader = khr::Swapchain::new(&instance, &device);
        let (surface_format, format) = match surface {
            Some(surface) => pick_surface_format(&surface_loader, pdevice, surface)?,
            None => (
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                Format::RGBA8Unorm,
            ),
        };

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance, &device, pdevice,
        ))?;

        let timestamp_period = properties.limits.timestamp_period;
        let timestamps =
            properties.limits.timestamp_compute_and_graphics == vk::TRUE && timestamp_period > 0.0;
        if !timestamps {
            warn!("Device cannot time GPU work; timers are disabled");
        }

        Ok(Self {
            inner: Rc::new(Inner {
                _entry: entry,
                instance,
                pdevice,
                device,
                allocator: ManuallyDrop::new(allocator),
                surface_loader,
                swapchain_loader,
                surface,
                surface_format,
                format,
                timestamp_period,
                timestamps,
                command_pools: RefCell::new(HashMap::new()),
                buffers: RefCell::new(HashMap::new()),
                textures: RefCell::new(HashMap::new()),
                owns_device,
            }),
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.inner.device
    }

    fn surface(&self) -> Result<vk::SurfaceKHR> {
        self.inner
            .surface
            .ok_or_else(|| GPUError::UnsupportedConfiguration("device has no surface".to_string()))
    }

    fn command_pool(&self, family: u32) -> Result<vk::CommandPool> {
        let mut pools = self.inner.command_pools.borrow_mut();
        if let Some(pool) = pools.get(&family) {
            return Ok(*pool);
        }

        let pool = unsafe {
            self.inner.device.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(family)
                    .flags(
                        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                            | vk::CommandPoolCreateFlags::TRANSIENT,
                    )
                    .build(),
                None,
            )?
        };
        pools.insert(family, pool);
        Ok(pool)
    }

    fn create_view(&self, image: vk::Image, format: Format) -> Result<vk::ImageView> {
        let view = unsafe {
            self.inner.device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .format(lib_to_vk_image_format(&format))
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .subresource_range(color_range())
                    .build(),
                None,
            )?
        };
        Ok(view)
    }

    /// Records a layout change for `image`. Whole-pipeline scope; these
    /// happen once per upload or present.
    unsafe fn transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .image(image)
            .old_layout(old)
            .new_layout(new)
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(color_range())
            .build();

        self.inner.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}

impl Device for VulkanDevice {
    type CommandBuffer = vk::CommandBuffer;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type Queue = vk::Queue;
    type Buffer = vk::Buffer;
    type Texture = VulkanTexture;
    type Timer = VulkanTimer;
    type Swapchain = vk::SwapchainKHR;

    fn queues(&self, family: QueueFamily) -> Vec<vk::Queue> {
        (0..family.queue_count)
            .map(|index| unsafe { self.inner.device.get_device_queue(family.index, index) })
            .collect()
    }

    fn create_command_buffers(&self, family: u32, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        let pool = self.command_pool(family)?;
        let bufs = unsafe {
            self.inner.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(count as u32)
                    .build(),
            )?
        };
        Ok(bufs)
    }

    fn free_command_buffers(&self, family: u32, buffers: &[vk::CommandBuffer]) {
        if let Some(pool) = self.inner.command_pools.borrow().get(&family) {
            unsafe { self.inner.device.free_command_buffers(*pool, buffers) };
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.inner
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.inner.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                    .build(),
            )?
        };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.inner.device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.inner
                .device
                .create_fence(&vk::FenceCreateInfo::builder().flags(flags).build(), None)?
        };
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.inner.device.destroy_fence(fence, None) };
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.inner.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        Ok(unsafe { self.inner.device.get_fence_status(fence)? })
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<bool> {
        let nanos = timeout.as_nanos().min(u64::MAX as u128) as u64;
        match unsafe { self.inner.device.wait_for_fences(&[fence], true, nanos) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let sem = unsafe {
            self.inner
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(sem)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.inner.device.destroy_semaphore(semaphore, None) };
    }

    fn queue_submit(&self, queue: vk::Queue, submission: &Submission<'_, Self>) -> Result<()> {
        let stages: Vec<vk::PipelineStageFlags> =
            submission.wait_stages.iter().map(|s| (*s).into()).collect();
        let cmds = [submission.command_buffer];
        let signal: Vec<vk::Semaphore> = submission.signal_semaphore.into_iter().collect();

        let info = vk::SubmitInfo::builder()
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signal)
            .build();

        unsafe {
            self.inner
                .device
                .queue_submit(queue, &[info], submission.fence)?
        };
        Ok(())
    }

    fn create_buffer(&self, shape: &BufferShape) -> Result<vk::Buffer> {
        let host = shape.host_mapped || shape.host_mutable;
        let create_info = vk_mem::AllocationCreateInfo {
            usage: if host {
                vk_mem::MemoryUsage::AutoPreferHost
            } else {
                vk_mem::MemoryUsage::Auto
            },
            flags: if host {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        let (buffer, alloc) = unsafe {
            self.inner.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(shape.size.max(1))
                    .usage(shape.kind.into())
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &create_info,
            )
        }
        .map_err(|err| {
            GPUError::AllocationFailure(format!("buffer of {} bytes: {}", shape.size, err))
        })?;

        self.inner.buffers.borrow_mut().insert(
            buffer,
            BufferRecord {
                alloc,
                shape: *shape,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        if let Some(mut record) = self.inner.buffers.borrow_mut().remove(&buffer) {
            unsafe { self.inner.allocator.destroy_buffer(buffer, &mut record.alloc) };
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut buffers = self.inner.buffers.borrow_mut();
        let record = buffers.get_mut(&buffer).ok_or(GPUError::InvalidHandle)?;
        if !record.shape.host_mutable {
            return Err(GPUError::InvalidState {
                expected: "host mutable buffer",
                found: "device-only buffer",
            });
        }
        if offset + data.len() as u64 > record.shape.size {
            return Err(GPUError::CapacityExceeded {
                limit: record.shape.size as usize,
            });
        }

        let allocator = &self.inner.allocator;
        unsafe {
            let mapped = allocator.map_memory(&mut record.alloc)?;
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped.add(offset as usize),
                data.len(),
            );
            allocator.unmap_memory(&mut record.alloc);
        }
        allocator.flush_allocation(&record.alloc, offset as usize, data.len())?;
        Ok(())
    }

    fn format_caps(&self, format: Format) -> FormatCaps {
        let props = unsafe {
            self.inner.instance.get_physical_device_format_properties(
                self.inner.pdevice,
                lib_to_vk_image_format(&format),
            )
        };
        let features = props.optimal_tiling_features;
        FormatCaps {
            renderable: features.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT),
            linear_filter: features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR),
            storable: features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE),
        }
    }

    fn create_texture(&self, info: &TextureInfo) -> Result<VulkanTexture> {
        let usage: vk::ImageUsageFlags = info.usage.into();
        let (image, mut alloc) = unsafe {
            self.inner.allocator.create_image(
                &vk::ImageCreateInfo::builder()
                    .extent(vk::Extent3D {
                        width: info.dim[0],
                        height: info.dim[1],
                        depth: 1,
                    })
                    .array_layers(1)
                    .format(lib_to_vk_image_format(&info.format))
                    .mip_levels(1)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .usage(usage | vk::ImageUsageFlags::TRANSFER_DST)
                    .image_type(vk::ImageType::TYPE_2D)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::Auto,
                    ..Default::default()
                },
            )
        }
        .map_err(|err| {
            GPUError::AllocationFailure(format!(
                "{} ({}x{}): {}",
                info.debug_name, info.dim[0], info.dim[1], err
            ))
        })?;

        let view = match self.create_view(image, info.format) {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.inner.allocator.destroy_image(image, &mut alloc) };
                return Err(err);
            }
        };

        self.inner.textures.borrow_mut().insert(
            image,
            TextureRecord {
                alloc: Some(alloc),
                view,
                extent: info.dim,
                format: info.format,
                layout: vk::ImageLayout::UNDEFINED,
            },
        );
        Ok(VulkanTexture { image, view })
    }

    fn destroy_texture(&self, texture: VulkanTexture) {
        let record = self.inner.textures.borrow_mut().remove(&texture.image);
        if let Some(record) = record {
            unsafe {
                self.inner.device.destroy_image_view(record.view, None);
                if let Some(mut alloc) = record.alloc {
                    self.inner.allocator.destroy_image(texture.image, &mut alloc);
                }
            }
        }
    }

    fn texture_extent(&self, texture: VulkanTexture) -> [u32; 2] {
        self.inner
            .textures
            .borrow()
            .get(&texture.image)
            .map(|r| r.extent)
            .unwrap_or([0, 0])
    }

    fn invalidate_texture(&self, texture: VulkanTexture) {
        if let Some(record) = self.inner.textures.borrow_mut().get_mut(&texture.image) {
            record.layout = vk::ImageLayout::UNDEFINED;
        }
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: VulkanTexture,
        region: &BufferTextureCopy,
    ) {
        let mut textures = self.inner.textures.borrow_mut();
        let record = match textures.get_mut(&dst.image) {
            Some(record) => record,
            None => {
                error!("Copy into unknown texture {:?}", dst.image);
                return;
            }
        };

        let copy = vk::BufferImageCopy::builder()
            .buffer_offset(region.buffer_offset)
            .buffer_row_length(region.row_stride / record.format.texel_size())
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            )
            .image_extent(vk::Extent3D {
                width: region.extent[0],
                height: region.extent[1],
                depth: 1,
            })
            .build();

        unsafe {
            self.transition(
                cmd,
                dst.image,
                record.layout,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            self.inner.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
            self.transition(
                cmd,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }
        record.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    }

    fn create_timer(&self) -> Option<VulkanTimer> {
        if !self.inner.timestamps {
            return None;
        }
        match VulkanTimer::new(&self.inner.device) {
            Ok(timer) => Some(timer),
            Err(err) => {
                error!("Failed creating GPU timer: {}", err);
                None
            }
        }
    }

    fn destroy_timer(&self, timer: VulkanTimer) {
        unsafe { timer.destroy(&self.inner.device) };
    }

    fn timer_start(&self, timer: &mut VulkanTimer, cmd: vk::CommandBuffer) {
        unsafe { timer.begin(&self.inner.device, cmd) };
    }

    fn timer_stop(&self, timer: &mut VulkanTimer, cmd: vk::CommandBuffer) -> u64 {
        unsafe { timer.end(&self.inner.device, cmd, self.inner.timestamp_period) }
    }

    fn surface_format(&self) -> Format {
        self.inner.format
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        let surface = self.surface()?;
        let caps = unsafe {
            self.inner
                .surface_loader
                .get_physical_device_surface_capabilities(self.inner.pdevice, surface)?
        };
        Ok(SurfaceCapabilities::from(&caps))
    }

    fn surface_present_modes(&self) -> Result<Vec<PresentMode>> {
        let surface = self.surface()?;
        let modes = unsafe {
            self.inner
                .surface_loader
                .get_physical_device_surface_present_modes(self.inner.pdevice, surface)?
        };
        Ok(modes.into_iter().filter_map(vk_to_lib_present_mode).collect())
    }

    fn create_swapchain(
        &self,
        info: &SwapchainCreateInfo,
        old: Option<vk::SwapchainKHR>,
    ) -> Result<vk::SwapchainKHR> {
        let surface = self.surface()?;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(info.min_image_count)
            .image_format(lib_to_vk_image_format(&info.format))
            .image_color_space(self.inner.surface_format.color_space)
            .image_extent(vk::Extent2D {
                width: info.extent.width,
                height: info.extent.height,
            })
            .image_array_layers(1)
            .image_usage(info.usage.into())
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(info.pre_transform.into())
            .composite_alpha(info.composite_alpha.into())
            .present_mode(info.present_mode.into())
            .clipped(true)
            .old_swapchain(old.unwrap_or_else(vk::SwapchainKHR::null))
            .build();

        let swapchain = unsafe {
            self.inner
                .swapchain_loader
                .create_swapchain(&create_info, None)?
        };
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.inner.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
        info: &SwapchainCreateInfo,
    ) -> Result<Vec<VulkanTexture>> {
        let images = unsafe { self.inner.swapchain_loader.get_swapchain_images(swapchain)? };

        let mut wrapped = Vec::with_capacity(images.len());
        for image in images {
            let view = match self.create_view(image, info.format) {
                Ok(view) => view,
                Err(err) => {
                    for tex in wrapped {
                        self.destroy_texture(tex);
                    }
                    return Err(err);
                }
            };
            self.inner.textures.borrow_mut().insert(
                image,
                TextureRecord {
                    alloc: None,
                    view,
                    extent: [info.extent.width, info.extent.height],
                    format: info.format,
                    layout: vk::ImageLayout::UNDEFINED,
                },
            );
            wrapped.push(VulkanTexture { image, view });
        }
        Ok(wrapped)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<u32> {
        let (index, suboptimal) = unsafe {
            self.inner.swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )?
        };
        if suboptimal {
            trace!("Swapchain is suboptimal");
        }
        Ok(index)
    }

    fn cmd_prepare_present(&self, cmd: vk::CommandBuffer, image: VulkanTexture) {
        let mut textures = self.inner.textures.borrow_mut();
        if let Some(record) = textures.get_mut(&image.image) {
            unsafe {
                self.transition(
                    cmd,
                    image.image,
                    record.layout,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                )
            };
            record.layout = vk::ImageLayout::PRESENT_SRC_KHR;
        }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<()> {
        let swapchains = [swapchain];
        let indices = [image_index];
        let waits = [wait];
        unsafe {
            self.inner.swapchain_loader.queue_present(
                queue,
                &vk::PresentInfoKHR::builder()
                    .wait_semaphores(&waits)
                    .swapchains(&swapchains)
                    .image_indices(&indices)
                    .build(),
            )?
        };
        Ok(())
    }
}
