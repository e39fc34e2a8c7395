use std::fmt::Debug;
use std::time::Duration;

use super::{
    BufferShape, Format, FormatCaps, PipelineStage, PresentMode, QueueFamily, Result,
    SurfaceCapabilities, SwapchainCreateInfo, TextureInfo,
};

/// One queue submission: a single command buffer plus its synchronization.
#[derive(Debug)]
pub struct Submission<'a, D: Device> {
    pub command_buffer: D::CommandBuffer,
    pub wait_semaphores: &'a [D::Semaphore],
    pub wait_stages: &'a [PipelineStage],
    pub signal_semaphore: Option<D::Semaphore>,
    pub fence: D::Fence,
}

/// Region of a staging buffer copied into a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferTextureCopy {
    pub buffer_offset: u64,
    /// Row pitch of the source data, in bytes.
    pub row_stride: u32,
    pub extent: [u32; 2],
}

/// The graphics API underneath the pools.
///
/// A `Device` is a cheap handle to a logical device; clones refer to the same
/// device. Every method is called from the single thread that owns the
/// [`Context`](super::Context). Device and surface negotiation happen before a
/// `Device` exists and are not part of this trait.
pub trait Device: Clone + 'static {
    type CommandBuffer: Copy + Debug + 'static;
    type Fence: Copy + Debug + 'static;
    type Semaphore: Copy + Debug + 'static;
    type Queue: Copy + Debug + 'static;
    type Buffer: Copy + Debug + 'static;
    type Texture: Copy + Debug + 'static;
    type Timer: Debug + 'static;
    type Swapchain: Copy + Debug + 'static;

    fn queues(&self, family: QueueFamily) -> Vec<Self::Queue>;

    fn create_command_buffers(&self, family: u32, count: usize) -> Result<Vec<Self::CommandBuffer>>;
    fn free_command_buffers(&self, family: u32, buffers: &[Self::CommandBuffer]);
    fn reset_command_buffer(&self, cmd: Self::CommandBuffer) -> Result<()>;
    fn begin_command_buffer(&self, cmd: Self::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, cmd: Self::CommandBuffer) -> Result<()>;

    fn create_fence(&self, signaled: bool) -> Result<Self::Fence>;
    fn destroy_fence(&self, fence: Self::Fence);
    fn reset_fence(&self, fence: Self::Fence) -> Result<()>;
    fn fence_signaled(&self, fence: Self::Fence) -> Result<bool>;
    /// Blocks up to `timeout`. Returns whether the fence is signaled.
    fn wait_fence(&self, fence: Self::Fence, timeout: Duration) -> Result<bool>;

    fn create_semaphore(&self) -> Result<Self::Semaphore>;
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);

    fn queue_submit(&self, queue: Self::Queue, submission: &Submission<'_, Self>) -> Result<()>;

    fn create_buffer(&self, shape: &BufferShape) -> Result<Self::Buffer>;
    fn destroy_buffer(&self, buffer: Self::Buffer);
    fn write_buffer(&self, buffer: Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    fn format_caps(&self, format: Format) -> FormatCaps;
    fn create_texture(&self, info: &TextureInfo) -> Result<Self::Texture>;
    fn destroy_texture(&self, texture: Self::Texture);
    fn texture_extent(&self, texture: Self::Texture) -> [u32; 2];
    /// Marks the contents as undefined so the next use may discard them.
    fn invalidate_texture(&self, texture: Self::Texture);
    fn cmd_copy_buffer_to_texture(
        &self,
        cmd: Self::CommandBuffer,
        src: Self::Buffer,
        dst: Self::Texture,
        region: &BufferTextureCopy,
    );

    /// `None` when the device cannot time GPU work.
    fn create_timer(&self) -> Option<Self::Timer>;
    fn destroy_timer(&self, timer: Self::Timer);
    fn timer_start(&self, timer: &mut Self::Timer, cmd: Self::CommandBuffer);
    /// Elapsed nanoseconds of an earlier measurement, or 0 if none is ready.
    fn timer_stop(&self, timer: &mut Self::Timer, cmd: Self::CommandBuffer) -> u64;

    fn surface_format(&self) -> Format;
    fn surface_capabilities(&self) -> Result<SurfaceCapabilities>;
    fn surface_present_modes(&self) -> Result<Vec<PresentMode>>;
    /// The mode used when the user does not ask for one.
    fn preferred_present_mode(&self) -> PresentMode {
        PresentMode::Fifo
    }
    fn create_swapchain(
        &self,
        info: &SwapchainCreateInfo,
        old: Option<Self::Swapchain>,
    ) -> Result<Self::Swapchain>;
    fn destroy_swapchain(&self, swapchain: Self::Swapchain);
    /// Texture wrappers for the chain's images. Freed with `destroy_texture`,
    /// which leaves the underlying image to the chain.
    fn swapchain_images(
        &self,
        swapchain: Self::Swapchain,
        info: &SwapchainCreateInfo,
    ) -> Result<Vec<Self::Texture>>;
    /// Fails with [`GPUError::AcquireStale`](super::GPUError::AcquireStale)
    /// when the chain is out of date.
    fn acquire_next_image(
        &self,
        swapchain: Self::Swapchain,
        signal: Self::Semaphore,
    ) -> Result<u32>;
    fn cmd_prepare_present(&self, cmd: Self::CommandBuffer, image: Self::Texture);
    fn queue_present(
        &self,
        queue: Self::Queue,
        swapchain: Self::Swapchain,
        image_index: u32,
        wait: Self::Semaphore,
    ) -> Result<()>;
}
