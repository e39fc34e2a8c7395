//! Host-only [`Device`] with a scripted GPU timeline.
//!
//! Nothing is executed. Submissions queue their fence on a single timeline
//! and retire in submission order when the caller says so (or when a blocking
//! wait asks for it). Failures can be injected to exercise error paths.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use super::{
    BufferShape, BufferTextureCopy, Device, Extent2D, Format, FormatCaps, GPUError,
    PipelineStage, PresentMode, QueueFamily, Result, Submission, SurfaceCapabilities,
    SwapchainCreateInfo, TextureInfo,
};

macro_rules! null_handle {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);
        )*
    };
}

null_handle!(
    NullCommandBuffer,
    NullFence,
    NullSemaphore,
    NullBuffer,
    NullTexture,
    NullSwapchain,
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NullQueue {
    pub family: u32,
    pub index: u32,
}

#[derive(Debug)]
pub struct NullTimer {
    started: usize,
}

impl NullTimer {
    /// Number of measurements begun on this timer.
    pub fn started(&self) -> usize {
        self.started
    }
}

/// What a single `queue_submit` looked like.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitRecord {
    pub family: u32,
    pub queue: u32,
    pub wait_count: usize,
    pub wait_stages: Vec<PipelineStage>,
    pub signaled: bool,
    pub fence: NullFence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentRecord {
    pub swapchain: NullSwapchain,
    pub image_index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyRecord {
    pub buffer: NullBuffer,
    pub texture: NullTexture,
    pub region: BufferTextureCopy,
}

/// Running totals of object lifetimes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NullStats {
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub invalidations: usize,
    pub swapchains_created: usize,
    pub swapchains_destroyed: usize,
}

#[derive(Debug)]
struct BufferState {
    shape: BufferShape,
    data: Vec<u8>,
}

#[derive(Debug)]
struct TextureState {
    extent: [u32; 2],
    /// Borrowed swapchain image; destroying it frees only the wrapper.
    wrapped: bool,
}

#[derive(Debug)]
struct SwapchainState {
    image_count: u32,
    next_image: u32,
}

#[derive(Debug)]
struct NullState {
    next_id: u64,
    recording: HashMap<u64, bool>,
    fences: HashMap<u64, bool>,
    semaphores: usize,
    timeline: VecDeque<u64>,
    submissions: Vec<SubmitRecord>,
    presents: Vec<PresentRecord>,
    copies: Vec<CopyRecord>,
    buffers: HashMap<u64, BufferState>,
    textures: HashMap<u64, TextureState>,
    swapchains: HashMap<u64, SwapchainState>,
    stats: NullStats,

    retire_on_wait: bool,
    waits: usize,
    failing_allocations: usize,
    failing_submits: usize,
    out_of_date: bool,

    timers_supported: bool,
    timer_results: VecDeque<u64>,

    surface_format: Format,
    surface_caps: SurfaceCapabilities,
    present_modes: Vec<PresentMode>,
    format_caps: HashMap<Format, FormatCaps>,
}

impl NullState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_allocation_failure(&mut self) -> bool {
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            true
        } else {
            false
        }
    }

    fn retire(&mut self, count: usize) {
        for _ in 0..count {
            match self.timeline.pop_front() {
                Some(fence) => {
                    self.fences.insert(fence, true);
                }
                None => break,
            }
        }
    }

    fn retire_through(&mut self, fence: u64) {
        if let Some(pos) = self.timeline.iter().position(|f| *f == fence) {
            self.retire(pos + 1);
        }
    }
}

impl Default for NullState {
    fn default() -> Self {
        Self {
            next_id: 0,
            recording: HashMap::new(),
            fences: HashMap::new(),
            semaphores: 0,
            timeline: VecDeque::new(),
            submissions: Vec::new(),
            presents: Vec::new(),
            copies: Vec::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            swapchains: HashMap::new(),
            stats: NullStats::default(),
            retire_on_wait: false,
            waits: 0,
            failing_allocations: 0,
            failing_submits: 0,
            out_of_date: false,
            timers_supported: true,
            timer_results: VecDeque::new(),
            surface_format: Format::BGRA8Unorm,
            surface_caps: SurfaceCapabilities::default(),
            present_modes: vec![PresentMode::Fifo, PresentMode::FifoRelaxed, PresentMode::Mailbox],
            format_caps: HashMap::new(),
        }
    }
}

/// Headless device. Clones share one timeline.
#[derive(Clone, Debug, Default)]
pub struct NullDevice {
    state: Rc<RefCell<NullState>>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the fences of the `count` oldest outstanding submissions.
    pub fn retire(&self, count: usize) {
        self.state.borrow_mut().retire(count);
    }

    pub fn retire_all(&self) {
        let mut state = self.state.borrow_mut();
        let pending = state.timeline.len();
        state.retire(pending);
    }

    pub fn outstanding(&self) -> usize {
        self.state.borrow().timeline.len()
    }

    /// When set, any blocking wait retires work up to the awaited fence.
    /// Waits without a deadline always do.
    pub fn set_retire_on_wait(&self, retire: bool) {
        self.state.borrow_mut().retire_on_wait = retire;
    }

    /// Number of blocking fence waits issued so far.
    pub fn wait_count(&self) -> usize {
        self.state.borrow().waits
    }

    pub fn fail_allocations(&self, count: usize) {
        self.state.borrow_mut().failing_allocations = count;
    }

    pub fn fail_next_submit(&self) {
        self.state.borrow_mut().failing_submits += 1;
    }

    pub fn set_out_of_date(&self, out_of_date: bool) {
        self.state.borrow_mut().out_of_date = out_of_date;
    }

    pub fn set_timers_supported(&self, supported: bool) {
        self.state.borrow_mut().timers_supported = supported;
    }

    /// Queues a duration returned by a later `timer_stop`.
    pub fn push_timer_result(&self, nanos: u64) {
        self.state.borrow_mut().timer_results.push_back(nanos);
    }

    pub fn set_surface_format(&self, format: Format) {
        self.state.borrow_mut().surface_format = format;
    }

    pub fn set_surface_capabilities(&self, caps: SurfaceCapabilities) {
        self.state.borrow_mut().surface_caps = caps;
    }

    pub fn set_present_modes(&self, modes: &[PresentMode]) {
        self.state.borrow_mut().present_modes = modes.to_vec();
    }

    pub fn set_format_caps(&self, format: Format, caps: FormatCaps) {
        self.state.borrow_mut().format_caps.insert(format, caps);
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.borrow().submissions.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.borrow().presents.clone()
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        self.state.borrow().copies.clone()
    }

    pub fn stats(&self) -> NullStats {
        self.state.borrow().stats
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    /// Owned textures still alive, not counting swapchain wrappers.
    pub fn live_textures(&self) -> usize {
        self.state
            .borrow()
            .textures
            .values()
            .filter(|t| !t.wrapped)
            .count()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.borrow().swapchains.len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state.borrow().semaphores
    }

    pub fn buffer_contents(&self, buffer: NullBuffer) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .buffers
            .get(&buffer.0)
            .map(|b| b.data.clone())
    }
}

impl Device for NullDevice {
    type CommandBuffer = NullCommandBuffer;
    type Fence = NullFence;
    type Semaphore = NullSemaphore;
    type Queue = NullQueue;
    type Buffer = NullBuffer;
    type Texture = NullTexture;
    type Timer = NullTimer;
    type Swapchain = NullSwapchain;

    fn queues(&self, family: QueueFamily) -> Vec<NullQueue> {
        (0..family.queue_count)
            .map(|index| NullQueue {
                family: family.index,
                index,
            })
            .collect()
    }

    fn create_command_buffers(&self, _family: u32, count: usize) -> Result<Vec<NullCommandBuffer>> {
        let mut state = self.state.borrow_mut();
        Ok((0..count)
            .map(|_| {
                let id = state.alloc_id();
                state.recording.insert(id, false);
                NullCommandBuffer(id)
            })
            .collect())
    }

    fn free_command_buffers(&self, _family: u32, buffers: &[NullCommandBuffer]) {
        let mut state = self.state.borrow_mut();
        for buf in buffers {
            state.recording.remove(&buf.0);
        }
    }

    fn reset_command_buffer(&self, cmd: NullCommandBuffer) -> Result<()> {
        match self.state.borrow_mut().recording.get_mut(&cmd.0) {
            Some(recording) => {
                *recording = false;
                Ok(())
            }
            None => Err(GPUError::InvalidHandle),
        }
    }

    fn begin_command_buffer(&self, cmd: NullCommandBuffer) -> Result<()> {
        match self.state.borrow_mut().recording.get_mut(&cmd.0) {
            Some(true) => Err(GPUError::InvalidState {
                expected: "initial",
                found: "recording",
            }),
            Some(recording) => {
                *recording = true;
                Ok(())
            }
            None => Err(GPUError::InvalidHandle),
        }
    }

    fn end_command_buffer(&self, cmd: NullCommandBuffer) -> Result<()> {
        match self.state.borrow_mut().recording.get_mut(&cmd.0) {
            Some(false) => Err(GPUError::InvalidState {
                expected: "recording",
                found: "initial",
            }),
            Some(recording) => {
                *recording = false;
                Ok(())
            }
            None => Err(GPUError::InvalidHandle),
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<NullFence> {
        let mut state = self.state.borrow_mut();
        let id = state.alloc_id();
        state.fences.insert(id, signaled);
        Ok(NullFence(id))
    }

    fn destroy_fence(&self, fence: NullFence) {
        self.state.borrow_mut().fences.remove(&fence.0);
    }

    fn reset_fence(&self, fence: NullFence) -> Result<()> {
        match self.state.borrow_mut().fences.get_mut(&fence.0) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(GPUError::InvalidHandle),
        }
    }

    fn fence_signaled(&self, fence: NullFence) -> Result<bool> {
        self.state
            .borrow()
            .fences
            .get(&fence.0)
            .copied()
            .ok_or(GPUError::InvalidHandle)
    }

    fn wait_fence(&self, fence: NullFence, timeout: Duration) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.waits += 1;
        if !state.fences.contains_key(&fence.0) {
            return Err(GPUError::InvalidHandle);
        }
        if state.retire_on_wait || timeout == Duration::MAX {
            state.retire_through(fence.0);
        }
        Ok(state.fences.get(&fence.0).copied().unwrap_or(false))
    }

    fn create_semaphore(&self) -> Result<NullSemaphore> {
        let mut state = self.state.borrow_mut();
        state.semaphores += 1;
        Ok(NullSemaphore(state.alloc_id()))
    }

    fn destroy_semaphore(&self, _semaphore: NullSemaphore) {
        let mut state = self.state.borrow_mut();
        state.semaphores = state.semaphores.saturating_sub(1);
    }

    fn queue_submit(&self, queue: NullQueue, submission: &Submission<'_, Self>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(GPUError::Backend("device lost".to_string()));
        }

        state.fences.insert(submission.fence.0, false);
        state.timeline.push_back(submission.fence.0);
        state.submissions.push(SubmitRecord {
            family: queue.family,
            queue: queue.index,
            wait_count: submission.wait_semaphores.len(),
            wait_stages: submission.wait_stages.to_vec(),
            signaled: submission.signal_semaphore.is_some(),
            fence: submission.fence,
        });
        Ok(())
    }

    fn create_buffer(&self, shape: &BufferShape) -> Result<NullBuffer> {
        let mut state = self.state.borrow_mut();
        if state.take_allocation_failure() {
            return Err(GPUError::AllocationFailure(format!(
                "buffer of {} bytes",
                shape.size
            )));
        }

        let id = state.alloc_id();
        state.buffers.insert(
            id,
            BufferState {
                shape: *shape,
                data: vec![0; shape.size as usize],
            },
        );
        state.stats.buffers_created += 1;
        Ok(NullBuffer(id))
    }

    fn destroy_buffer(&self, buffer: NullBuffer) {
        let mut state = self.state.borrow_mut();
        if state.buffers.remove(&buffer.0).is_some() {
            state.stats.buffers_destroyed += 1;
        }
    }

    fn write_buffer(&self, buffer: NullBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let buf = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(GPUError::InvalidHandle)?;
        if !buf.shape.host_mutable {
            return Err(GPUError::InvalidState {
                expected: "host mutable buffer",
                found: "device-only buffer",
            });
        }

        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            return Err(GPUError::CapacityExceeded {
                limit: buf.data.len(),
            });
        }
        buf.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn format_caps(&self, format: Format) -> FormatCaps {
        self.state
            .borrow()
            .format_caps
            .get(&format)
            .copied()
            .unwrap_or(FormatCaps {
                renderable: true,
                linear_filter: true,
                storable: true,
            })
    }

    fn create_texture(&self, info: &TextureInfo) -> Result<NullTexture> {
        let mut state = self.state.borrow_mut();
        if state.take_allocation_failure() {
            return Err(GPUError::AllocationFailure(format!(
                "texture {}x{}",
                info.dim[0], info.dim[1]
            )));
        }

        let id = state.alloc_id();
        state.textures.insert(
            id,
            TextureState {
                extent: info.dim,
                wrapped: false,
            },
        );
        state.stats.textures_created += 1;
        Ok(NullTexture(id))
    }

    fn destroy_texture(&self, texture: NullTexture) {
        let mut state = self.state.borrow_mut();
        if let Some(tex) = state.textures.remove(&texture.0) {
            if !tex.wrapped {
                state.stats.textures_destroyed += 1;
            }
        }
    }

    fn texture_extent(&self, texture: NullTexture) -> [u32; 2] {
        self.state
            .borrow()
            .textures
            .get(&texture.0)
            .map(|t| t.extent)
            .unwrap_or([0, 0])
    }

    fn invalidate_texture(&self, _texture: NullTexture) {
        self.state.borrow_mut().stats.invalidations += 1;
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        _cmd: NullCommandBuffer,
        src: NullBuffer,
        dst: NullTexture,
        region: &BufferTextureCopy,
    ) {
        self.state.borrow_mut().copies.push(CopyRecord {
            buffer: src,
            texture: dst,
            region: *region,
        });
    }

    fn create_timer(&self) -> Option<NullTimer> {
        if self.state.borrow().timers_supported {
            Some(NullTimer { started: 0 })
        } else {
            None
        }
    }

    fn destroy_timer(&self, _timer: NullTimer) {}

    fn timer_start(&self, timer: &mut NullTimer, _cmd: NullCommandBuffer) {
        timer.started += 1;
    }

    fn timer_stop(&self, _timer: &mut NullTimer, _cmd: NullCommandBuffer) -> u64 {
        self.state
            .borrow_mut()
            .timer_results
            .pop_front()
            .unwrap_or(0)
    }

    fn surface_format(&self) -> Format {
        self.state.borrow().surface_format
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        Ok(self.state.borrow().surface_caps)
    }

    fn surface_present_modes(&self) -> Result<Vec<PresentMode>> {
        Ok(self.state.borrow().present_modes.clone())
    }

    fn create_swapchain(
        &self,
        info: &SwapchainCreateInfo,
        _old: Option<NullSwapchain>,
    ) -> Result<NullSwapchain> {
        let mut state = self.state.borrow_mut();
        let id = state.alloc_id();
        state.swapchains.insert(
            id,
            SwapchainState {
                image_count: info.min_image_count.max(1),
                next_image: 0,
            },
        );
        state.stats.swapchains_created += 1;
        Ok(NullSwapchain(id))
    }

    fn destroy_swapchain(&self, swapchain: NullSwapchain) {
        let mut state = self.state.borrow_mut();
        if state.swapchains.remove(&swapchain.0).is_some() {
            state.stats.swapchains_destroyed += 1;
        }
    }

    fn swapchain_images(
        &self,
        swapchain: NullSwapchain,
        info: &SwapchainCreateInfo,
    ) -> Result<Vec<NullTexture>> {
        let mut state = self.state.borrow_mut();
        let count = state
            .swapchains
            .get(&swapchain.0)
            .ok_or(GPUError::InvalidHandle)?
            .image_count;
        let Extent2D { width, height } = info.extent;

        Ok((0..count)
            .map(|_| {
                let id = state.alloc_id();
                state.textures.insert(
                    id,
                    TextureState {
                        extent: [width, height],
                        wrapped: true,
                    },
                );
                NullTexture(id)
            })
            .collect())
    }

    fn acquire_next_image(&self, swapchain: NullSwapchain, _signal: NullSemaphore) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        if state.out_of_date {
            return Err(GPUError::AcquireStale);
        }
        let chain = state
            .swapchains
            .get_mut(&swapchain.0)
            .ok_or(GPUError::InvalidHandle)?;
        let index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.image_count;
        Ok(index)
    }

    fn cmd_prepare_present(&self, _cmd: NullCommandBuffer, _image: NullTexture) {}

    fn queue_present(
        &self,
        _queue: NullQueue,
        swapchain: NullSwapchain,
        image_index: u32,
        _wait: NullSemaphore,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.out_of_date {
            return Err(GPUError::AcquireStale);
        }
        state.presents.push(PresentRecord {
            swapchain,
            image_index,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submissions_retire_in_order() {
        let device = NullDevice::new();
        let queue = device.queues(QueueFamily {
            index: 0,
            queue_count: 1,
        })[0];
        let cmd = device.create_command_buffers(0, 1).unwrap()[0];
        let a = device.create_fence(false).unwrap();
        let b = device.create_fence(false).unwrap();

        for fence in [a, b] {
            device.begin_command_buffer(cmd).unwrap();
            device.end_command_buffer(cmd).unwrap();
            device
                .queue_submit(
                    queue,
                    &Submission {
                        command_buffer: cmd,
                        wait_semaphores: &[],
                        wait_stages: &[],
                        signal_semaphore: None,
                        fence,
                    },
                )
                .unwrap();
        }

        assert!(!device.fence_signaled(a).unwrap());
        device.retire(1);
        assert!(device.fence_signaled(a).unwrap());
        assert!(!device.fence_signaled(b).unwrap());

        // A finite wait does not move the timeline unless asked to.
        assert!(!device.wait_fence(b, Duration::from_micros(10)).unwrap());
        assert!(device.wait_fence(b, Duration::MAX).unwrap());
        assert_eq!(device.outstanding(), 0);
    }

    #[test]
    fn command_buffer_states_are_checked() {
        let device = NullDevice::new();
        let cmd = device.create_command_buffers(0, 1).unwrap()[0];
        assert!(device.end_command_buffer(cmd).is_err());
        device.begin_command_buffer(cmd).unwrap();
        assert!(device.begin_command_buffer(cmd).is_err());
        device.reset_command_buffer(cmd).unwrap();
        device.begin_command_buffer(cmd).unwrap();
    }

    #[test]
    fn host_writes_respect_mutability() {
        let device = NullDevice::new();
        let shape = BufferShape {
            size: 4,
            host_mutable: true,
            ..Default::default()
        };
        let buf = device.create_buffer(&shape).unwrap();
        device.write_buffer(buf, 1, &[7, 8]).unwrap();
        assert_eq!(device.buffer_contents(buf).unwrap(), vec![0, 7, 8, 0]);
        assert!(device.write_buffer(buf, 3, &[1, 2]).is_err());

        let frozen = device
            .create_buffer(&BufferShape {
                host_mutable: false,
                ..shape
            })
            .unwrap();
        assert!(device.write_buffer(frozen, 0, &[1]).is_err());
    }
}
