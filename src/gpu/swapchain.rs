use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use super::{
    CompositeAlpha, Context, Device, Extent2D, GPUError, PipelineStage, QueueType, Result,
    SurfaceTransform, SwapchainCreateInfo, SwapchainInfo, TextureUsage,
};

/// Alpha modes in order of preference.
const ALPHA_MODES: [CompositeAlpha; 2] = [CompositeAlpha::POST_MULTIPLIED, CompositeAlpha::OPAQUE];
/// Pre-transforms in order of preference.
const TRANSFORMS: [SurfaceTransform; 2] = [SurfaceTransform::IDENTITY, SurfaceTransform::INHERIT];

/// How long each throttling poll in [`Swapchain::swap_buffers`] may block.
const SWAP_POLL_TIMEOUT: Duration = Duration::from_micros(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    /// Configured, no chain yet.
    Initialized,
    /// A resize is underway or failed; frames cannot be started.
    Resizing,
    Ready,
    Destroyed,
}

impl SwapchainState {
    fn name(&self) -> &'static str {
        match self {
            SwapchainState::Initialized => "initialized",
            SwapchainState::Resizing => "resizing",
            SwapchainState::Ready => "ready",
            SwapchainState::Destroyed => "destroyed",
        }
    }
}

/// An acquired presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainFrame<T> {
    pub image: T,
    pub index: u32,
}

/// Presentable image chain plus frame pacing.
pub struct Swapchain<D: Device> {
    device: D,
    state: SwapchainState,
    template: SwapchainCreateInfo,
    current: Option<SwapchainCreateInfo>,
    requested: Option<[u32; 2]>,
    swapchain: Option<D::Swapchain>,
    images: Vec<D::Texture>,
    acquire_sems: Vec<D::Semaphore>,
    sem_index: usize,
    acquired: Option<u32>,
    depth: usize,
    frames_in_flight: Rc<Cell<usize>>,
}

fn clamp_extent(requested: [u32; 2], min: Extent2D, max: Extent2D) -> Extent2D {
    Extent2D {
        width: requested[0].clamp(min.width, max.width.max(min.width)),
        height: requested[1].clamp(min.height, max.height.max(min.height)),
    }
}

impl<D: Device> Swapchain<D> {
    /// Validates the requested present mode and prepares the creation
    /// template. No chain exists until the first [`Swapchain::resize`].
    pub fn init(ctx: &Context<D>, info: &SwapchainInfo) -> Result<Self> {
        let device = ctx.device().clone();
        let present_mode = info
            .swap_mode
            .present_mode()
            .unwrap_or_else(|| device.preferred_present_mode());

        let supported = device.surface_present_modes()?;
        if !supported.contains(&present_mode) {
            error!("Requested present mode {:?} is not supported", present_mode);
            return Err(GPUError::UnsupportedConfiguration(format!(
                "present mode {:?}",
                present_mode
            )));
        }

        let template = SwapchainCreateInfo {
            format: device.surface_format(),
            present_mode,
            extent: Extent2D::default(),
            min_image_count: 0,
            composite_alpha: CompositeAlpha::empty(),
            pre_transform: SurfaceTransform::empty(),
            usage: TextureUsage::empty(),
        };
        debug!(
            "Swapchain uses {:?} with {:?}",
            template.format, template.present_mode
        );

        Ok(Self {
            device,
            state: SwapchainState::Initialized,
            template,
            current: None,
            requested: None,
            swapchain: None,
            images: Vec::new(),
            acquire_sems: Vec::new(),
            sem_index: 0,
            acquired: None,
            depth: info.depth.max(1),
            frames_in_flight: Rc::new(Cell::new(0)),
        })
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn extent(&self) -> Option<Extent2D> {
        self.current.map(|c| c.extent)
    }

    pub fn create_info(&self) -> Option<&SwapchainCreateInfo> {
        self.current.as_ref()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[D::Texture] {
        &self.images
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.get()
    }

    /// Changes how many frames may be queued ahead of presentation. Takes
    /// full effect with the next resize, which sizes the chain for it.
    pub fn update_length(&mut self, depth: usize) {
        self.depth = depth.max(1);
    }

    /// Largest per-component bit depth of the chain's format, or 0 before
    /// the first resize.
    pub fn current_color_depth(&self) -> u32 {
        self.current
            .map(|c| c.format.component_depths().iter().copied().max().unwrap_or(0))
            .unwrap_or(0)
    }

    fn expect_state(&self, expected: SwapchainState) -> Result<()> {
        if self.state != expected {
            return Err(GPUError::InvalidState {
                expected: expected.name(),
                found: self.state.name(),
            });
        }
        Ok(())
    }

    /// (Re)creates the chain for a `width` x `height` surface.
    ///
    /// A no-op when the size did not change. The previous chain is destroyed
    /// only after all work submitted so far has completed.
    pub fn resize(&mut self, ctx: &mut Context<D>, width: u32, height: u32) -> Result<()> {
        if self.state == SwapchainState::Destroyed {
            return Err(GPUError::InvalidState {
                expected: "live swapchain",
                found: self.state.name(),
            });
        }
        if self.state == SwapchainState::Ready && self.requested == Some([width, height]) {
            return Ok(());
        }

        self.state = SwapchainState::Resizing;
        let caps = self.device.surface_capabilities()?;

        if let Some(current) = caps.current_extent {
            if current.width != width || current.height != height {
                warn!(
                    "Requested swapchain size ({}x{}) does not match the surface extent ({}x{})",
                    width, height, current.width, current.height
                );
            }
        }
        let extent = clamp_extent([width, height], caps.min_extent, caps.max_extent);

        let composite_alpha = ALPHA_MODES
            .into_iter()
            .find(|mode| caps.supported_alpha.contains(*mode))
            .ok_or_else(|| {
                error!("No supported alpha mode among {:?}", caps.supported_alpha);
                GPUError::UnsupportedConfiguration("composite alpha".to_string())
            })?;
        let pre_transform = TRANSFORMS
            .into_iter()
            .find(|t| caps.supported_transforms.contains(*t))
            .ok_or_else(|| {
                error!("No supported transform among {:?}", caps.supported_transforms);
                GPUError::UnsupportedConfiguration("surface transform".to_string())
            })?;

        let mut min_image_count = (self.depth as u32 + 1).max(caps.min_image_count);
        if caps.max_image_count > 0 {
            min_image_count = min_image_count.min(caps.max_image_count);
        }

        let info = SwapchainCreateInfo {
            extent,
            min_image_count,
            composite_alpha,
            pre_transform,
            usage: caps.supported_usage,
            ..self.template
        };

        let old = self.swapchain;
        let new = self.device.create_swapchain(&info, old)?;
        self.swapchain = Some(new);

        let old_images = std::mem::take(&mut self.images);
        if old.is_some() || !old_images.is_empty() {
            let device = self.device.clone();
            ctx.defer(move || {
                for image in old_images {
                    device.destroy_texture(image);
                }
                if let Some(old) = old {
                    device.destroy_swapchain(old);
                }
            });
        }

        self.images = self.device.swapchain_images(new, &info)?;
        while self.acquire_sems.len() < self.images.len() {
            self.acquire_sems.push(self.device.create_semaphore()?);
        }
        self.sem_index %= self.acquire_sems.len().max(1);
        self.acquired = None;

        info!(
            "Swapchain resized to {}x{} with {} images",
            extent.width,
            extent.height,
            self.images.len()
        );
        self.current = Some(info);
        self.requested = Some([width, height]);
        self.state = SwapchainState::Ready;
        Ok(())
    }

    /// Acquires the next image to render into.
    ///
    /// [`GPUError::AcquireStale`] means the chain is out of date: resize
    /// (even to the same size) and try again.
    pub fn start_frame(&mut self) -> Result<SwapchainFrame<D::Texture>> {
        self.expect_state(SwapchainState::Ready)?;
        let swapchain = self.swapchain.ok_or(GPUError::InvalidHandle)?;
        let sem = self.acquire_sems[self.sem_index];

        match self.device.acquire_next_image(swapchain, sem) {
            Ok(index) => {
                let image = *self
                    .images
                    .get(index as usize)
                    .ok_or(GPUError::InvalidHandle)?;
                trace!("Acquired swapchain image {}", index);
                self.acquired = Some(index);
                Ok(SwapchainFrame { image, index })
            }
            Err(GPUError::AcquireStale) => {
                debug!("Swapchain out of date");
                self.mark_stale();
                Err(GPUError::AcquireStale)
            }
            Err(err) => {
                error!("Failed acquiring swapchain image: {}", err);
                Err(err)
            }
        }
    }

    /// Presents the image from the last [`Swapchain::start_frame`].
    ///
    /// Submits a present-preparation command waiting on the acquire
    /// semaphore and counts the frame as in flight until that command
    /// completes.
    pub fn submit_frame(&mut self, ctx: &mut Context<D>) -> Result<()> {
        self.expect_state(SwapchainState::Ready)?;
        let swapchain = self.swapchain.ok_or(GPUError::InvalidHandle)?;
        let index = self.acquired.ok_or(GPUError::InvalidState {
            expected: "acquired image",
            found: "no image",
        })?;

        // The frame stays acquired if no slot is free, so it can be retried.
        let pool = ctx.pool_mut(QueueType::Graphics);
        let slot = pool.begin()?;
        self.acquired = None;
        let sem = self.acquire_sems[self.sem_index];
        self.sem_index = (self.sem_index + 1) % self.acquire_sems.len();

        let cmd = pool.command_buffer(slot)?;
        self.device
            .cmd_prepare_present(cmd, self.images[index as usize]);
        if let Err(err) = pool.add_dependency(slot, sem, PipelineStage::COLOR_ATTACHMENT_OUTPUT) {
            pool.discard(slot)?;
            return Err(err);
        }

        let in_flight = self.frames_in_flight.clone();
        in_flight.set(in_flight.get() + 1);
        pool.add_callback(slot, move || in_flight.set(in_flight.get() - 1))?;

        let queue = pool.current_queue();
        let done = pool.submit(slot, true)?.ok_or(GPUError::InvalidState {
            expected: "completion semaphore",
            found: "none",
        })?;

        trace!("Presenting swapchain image {}", index);
        let res = self.device.queue_present(queue, swapchain, index, done);
        if let Err(GPUError::AcquireStale) = res {
            self.mark_stale();
        }
        res
    }

    /// Forces the next resize to rebuild the chain even at the same size.
    fn mark_stale(&mut self) {
        self.state = SwapchainState::Resizing;
    }

    /// Blocks until fewer than `depth` frames are in flight.
    pub fn swap_buffers(&mut self, ctx: &mut Context<D>) -> Result<()> {
        self.expect_state(SwapchainState::Ready)?;
        while self.frames_in_flight.get() >= self.depth {
            ctx.poll(SWAP_POLL_TIMEOUT)?;
        }
        Ok(())
    }

    /// Waits for the device and frees the chain. This is the supported
    /// teardown; dropping a chain with frames in flight leaks it.
    pub fn destroy(mut self, ctx: &mut Context<D>) -> Result<()> {
        ctx.wait_idle()?;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        for image in self.images.drain(..) {
            self.device.destroy_texture(image);
        }
        for sem in self.acquire_sems.drain(..) {
            self.device.destroy_semaphore(sem);
        }
        if let Some(swapchain) = self.swapchain.take() {
            self.device.destroy_swapchain(swapchain);
        }
        self.state = SwapchainState::Destroyed;
    }
}

// Fallback for chains not torn down with `destroy`. Objects the GPU may still
// be using are left behind rather than freed under it.
impl<D: Device> Drop for Swapchain<D> {
    fn drop(&mut self) {
        if self.state == SwapchainState::Destroyed {
            return;
        }
        if self.frames_in_flight() > 0 || self.acquired.is_some() {
            warn!(
                "Swapchain dropped with {} frames in flight; leaking it",
                self.frames_in_flight()
            );
            self.state = SwapchainState::Destroyed;
            return;
        }
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::NullDevice;
    use crate::gpu::{ContextInfo, Format, PresentMode, SurfaceCapabilities, SwapMode, MAX_CMDS};

    fn setup() -> (NullDevice, Context<NullDevice>) {
        let device = NullDevice::new();
        let ctx = Context::new(device.clone(), &ContextInfo::default()).unwrap();
        (device, ctx)
    }

    #[test]
    fn rejects_unsupported_present_mode() {
        let (device, ctx) = setup();
        device.set_present_modes(&[PresentMode::Fifo]);
        let info = SwapchainInfo {
            swap_mode: SwapMode::Immediate,
            ..Default::default()
        };
        assert!(matches!(
            Swapchain::init(&ctx, &info),
            Err(GPUError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn image_count_follows_depth_and_surface_limits() {
        let (device, mut ctx) = setup();
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        sc.resize(&mut ctx, 640, 480).unwrap();
        assert_eq!(sc.image_count(), 4);

        device.set_surface_capabilities(SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        });
        sc.resize(&mut ctx, 800, 600).unwrap();
        assert_eq!(sc.create_info().unwrap().min_image_count, 3);
    }

    #[test]
    fn extent_is_clamped() {
        let (device, mut ctx) = setup();
        device.set_surface_capabilities(SurfaceCapabilities {
            current_extent: Some(Extent2D::new(1024, 768)),
            min_extent: Extent2D::new(16, 16),
            max_extent: Extent2D::new(1024, 768),
            ..Default::default()
        });
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        sc.resize(&mut ctx, 4000, 8).unwrap();
        assert_eq!(sc.extent(), Some(Extent2D::new(1024, 16)));
    }

    #[test]
    fn picks_ranked_alpha_and_transform() {
        let (device, mut ctx) = setup();
        device.set_surface_capabilities(SurfaceCapabilities {
            supported_alpha: CompositeAlpha::OPAQUE | CompositeAlpha::POST_MULTIPLIED,
            supported_transforms: SurfaceTransform::INHERIT | SurfaceTransform::ROTATE_90,
            ..Default::default()
        });
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        sc.resize(&mut ctx, 64, 64).unwrap();
        let info = sc.create_info().unwrap();
        assert_eq!(info.composite_alpha, CompositeAlpha::POST_MULTIPLIED);
        assert_eq!(info.pre_transform, SurfaceTransform::INHERIT);

        device.set_surface_capabilities(SurfaceCapabilities {
            supported_alpha: CompositeAlpha::PRE_MULTIPLIED,
            ..Default::default()
        });
        assert!(matches!(
            sc.resize(&mut ctx, 32, 32),
            Err(GPUError::UnsupportedConfiguration(_))
        ));
        assert_eq!(sc.state(), SwapchainState::Resizing);
        assert!(matches!(
            sc.start_frame(),
            Err(GPUError::InvalidState { .. })
        ));
    }

    #[test]
    fn color_depth_tracks_format() {
        let (device, mut ctx) = setup();
        device.set_surface_format(Format::A2BGR10);
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        assert_eq!(sc.current_color_depth(), 0);
        sc.resize(&mut ctx, 64, 64).unwrap();
        assert_eq!(sc.current_color_depth(), 10);
    }

    #[test]
    fn frames_must_be_acquired_before_submission() {
        let (_device, mut ctx) = setup();
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        assert!(matches!(
            sc.start_frame(),
            Err(GPUError::InvalidState { .. })
        ));
        sc.resize(&mut ctx, 64, 64).unwrap();
        assert!(matches!(
            sc.submit_frame(&mut ctx),
            Err(GPUError::InvalidState { .. })
        ));
    }

    #[test]
    fn stale_present_still_tracks_the_frame() {
        let (device, mut ctx) = setup();
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        sc.resize(&mut ctx, 64, 64).unwrap();
        sc.start_frame().unwrap();

        device.set_out_of_date(true);
        assert!(matches!(
            sc.submit_frame(&mut ctx),
            Err(GPUError::AcquireStale)
        ));
        assert_eq!(sc.state(), SwapchainState::Resizing);
        assert_eq!(sc.frames_in_flight(), 1);
        assert!(device.presents().is_empty());

        device.retire_all();
        ctx.poll(Duration::ZERO).unwrap();
        assert_eq!(sc.frames_in_flight(), 0);

        device.set_out_of_date(false);
        sc.resize(&mut ctx, 64, 64).unwrap();
        assert_eq!(sc.state(), SwapchainState::Ready);
    }

    #[test]
    fn update_length_resizes_chain_and_throttle() {
        let (device, mut ctx) = setup();
        device.set_retire_on_wait(true);
        let info = SwapchainInfo {
            depth: 2,
            ..Default::default()
        };
        let mut sc = Swapchain::init(&ctx, &info).unwrap();
        sc.resize(&mut ctx, 640, 480).unwrap();
        assert_eq!(sc.image_count(), 3);

        sc.update_length(4);
        sc.resize(&mut ctx, 800, 600).unwrap();
        assert_eq!(sc.depth(), 4);
        assert_eq!(sc.image_count(), 5);

        for _ in 0..3 {
            sc.start_frame().unwrap();
            sc.submit_frame(&mut ctx).unwrap();
        }
        let waits = device.wait_count();
        sc.swap_buffers(&mut ctx).unwrap();
        assert_eq!(device.wait_count(), waits);
        assert_eq!(sc.frames_in_flight(), 3);

        sc.start_frame().unwrap();
        sc.submit_frame(&mut ctx).unwrap();
        sc.swap_buffers(&mut ctx).unwrap();
        assert!(device.wait_count() > waits);
        assert!(sc.frames_in_flight() < 4);

        sc.update_length(0);
        assert_eq!(sc.depth(), 1);
    }

    #[test]
    fn full_ring_keeps_the_frame_acquired() {
        let (device, mut ctx) = setup();
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        sc.resize(&mut ctx, 64, 64).unwrap();
        let frame = sc.start_frame().unwrap();

        let pool = ctx.pool_mut(QueueType::Graphics);
        for _ in 0..MAX_CMDS - 1 {
            let slot = pool.begin().unwrap();
            pool.submit(slot, false).unwrap();
        }
        assert!(matches!(
            sc.submit_frame(&mut ctx),
            Err(GPUError::ResourceExhausted)
        ));
        assert_eq!(sc.frames_in_flight(), 0);

        device.retire_all();
        sc.submit_frame(&mut ctx).unwrap();
        let presents = device.presents();
        assert_eq!(presents.len(), 1);
        assert_eq!(presents[0].image_index, frame.index);
    }

    #[test]
    fn dropping_leaves_busy_chain_to_the_device() {
        let (device, mut ctx) = setup();
        let mut sc = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        sc.resize(&mut ctx, 64, 64).unwrap();
        sc.start_frame().unwrap();
        sc.submit_frame(&mut ctx).unwrap();
        drop(sc);
        assert_eq!(device.live_swapchains(), 1);

        let mut idle = Swapchain::init(&ctx, &SwapchainInfo::default()).unwrap();
        idle.resize(&mut ctx, 64, 64).unwrap();
        assert_eq!(device.live_swapchains(), 2);
        drop(idle);
        assert_eq!(device.live_swapchains(), 1);
    }
}
