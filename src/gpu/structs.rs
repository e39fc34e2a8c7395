use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QueueType {
    #[default]
    Graphics,
    Transfer,
}

/// A queue family picked during device negotiation.
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueueFamily {
    pub index: u32,
    pub queue_count: u32,
}

impl Default for QueueFamily {
    fn default() -> Self {
        Self {
            index: 0,
            queue_count: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContextInfo {
    pub graphics: QueueFamily,
    /// Distinct transfer-capable family for async uploads, if the device has one.
    pub transfer: Option<QueueFamily>,
}

bitflags! {
    /// Stages a dependency semaphore is waited on.
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const TOP_OF_PIPE           = 0x1;
        const VERTEX_SHADER         = 0x8;
        const FRAGMENT_SHADER       = 0x80;
        const COLOR_ATTACHMENT_OUTPUT = 0x400;
        const COMPUTE_SHADER        = 0x800;
        const TRANSFER              = 0x1000;
        const BOTTOM_OF_PIPE        = 0x2000;
        const ALL_COMMANDS          = 0x10000;
    }
}

#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BufferKind {
    #[default]
    TexUpload,
    Uniform,
    Storage,
    Vertex,
}

/// Shape of a pooled buffer. Two shapes are compatible when a buffer of the
/// old shape can serve a request for the new one.
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferShape {
    pub kind: BufferKind,
    pub size: u64,
    pub host_mapped: bool,
    pub host_mutable: bool,
}

impl BufferShape {
    pub fn compatible_with(&self, current: &BufferShape) -> bool {
        self.kind == current.kind
            && self.size <= current.size
            && self.host_mapped == current.host_mapped
            && self.host_mutable == current.host_mutable
    }
}

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Format {
    R8Unorm,
    RGB565,
    BGRA8Unorm,
    BGRA8Srgb,
    #[default]
    RGBA8Unorm,
    RGBA8Srgb,
    A2BGR10,
    RGBA16F,
    RGBA32F,
}

impl Format {
    /// Bit depth of each component, in component order.
    pub fn component_depths(&self) -> &'static [u32] {
        match self {
            Format::R8Unorm => &[8],
            Format::RGB565 => &[5, 6, 5],
            Format::BGRA8Unorm | Format::BGRA8Srgb => &[8, 8, 8, 8],
            Format::RGBA8Unorm | Format::RGBA8Srgb => &[8, 8, 8, 8],
            Format::A2BGR10 => &[10, 10, 10, 2],
            Format::RGBA16F => &[16, 16, 16, 16],
            Format::RGBA32F => &[32, 32, 32, 32],
        }
    }

    pub fn texel_size(&self) -> u32 {
        match self {
            Format::R8Unorm => 1,
            Format::RGB565 => 2,
            Format::RGBA16F => 8,
            Format::RGBA32F => 16,
            _ => 4,
        }
    }
}

#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatCaps {
    pub renderable: bool,
    pub linear_filter: bool,
    pub storable: bool,
}

bitflags! {
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED       = 0x1;
        const RENDER_TARGET = 0x2;
        const STORAGE       = 0x4;
        const BLIT_SRC      = 0x8;
        const BLIT_DST      = 0x10;
        const TRANSFER_DST  = 0x20;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureInfo<'a> {
    pub debug_name: &'a str,
    pub dim: [u32; 2],
    pub format: Format,
    pub usage: TextureUsage,
}

impl<'a> Default for TextureInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            dim: [1280, 1024],
            format: Format::RGBA8Unorm,
            usage: TextureUsage::SAMPLED,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

/// User-facing present mode choice.
#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SwapMode {
    /// Whatever the backend prefers.
    #[default]
    Auto,
    Fifo,
    FifoRelaxed,
    Mailbox,
    Immediate,
}

impl SwapMode {
    pub fn present_mode(&self) -> Option<PresentMode> {
        match self {
            SwapMode::Auto => None,
            SwapMode::Fifo => Some(PresentMode::Fifo),
            SwapMode::FifoRelaxed => Some(PresentMode::FifoRelaxed),
            SwapMode::Mailbox => Some(PresentMode::Mailbox),
            SwapMode::Immediate => Some(PresentMode::Immediate),
        }
    }
}

bitflags! {
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CompositeAlpha: u32 {
        const OPAQUE          = 0x1;
        const PRE_MULTIPLIED  = 0x2;
        const POST_MULTIPLIED = 0x4;
        const INHERIT         = 0x8;
    }
}

bitflags! {
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceTransform: u32 {
        const IDENTITY   = 0x1;
        const ROTATE_90  = 0x2;
        const ROTATE_180 = 0x4;
        const ROTATE_270 = 0x8;
        const INHERIT    = 0x100;
    }
}

/// What the surface reports for the current physical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// Zero means unbounded.
    pub max_image_count: u32,
    /// `None` when the surface size is determined by the swapchain.
    pub current_extent: Option<Extent2D>,
    pub min_extent: Extent2D,
    pub max_extent: Extent2D,
    pub supported_alpha: CompositeAlpha,
    pub supported_transforms: SurfaceTransform,
    pub supported_usage: TextureUsage,
}

impl Default for SurfaceCapabilities {
    fn default() -> Self {
        Self {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: None,
            min_extent: Extent2D::new(1, 1),
            max_extent: Extent2D::new(16384, 16384),
            supported_alpha: CompositeAlpha::OPAQUE,
            supported_transforms: SurfaceTransform::IDENTITY,
            supported_usage: TextureUsage::RENDER_TARGET
                | TextureUsage::BLIT_DST
                | TextureUsage::TRANSFER_DST
                | TextureUsage::STORAGE,
        }
    }
}

/// Fully resolved swapchain parameters handed to the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub format: Format,
    pub present_mode: PresentMode,
    pub extent: Extent2D,
    pub min_image_count: u32,
    pub composite_alpha: CompositeAlpha,
    pub pre_transform: SurfaceTransform,
    pub usage: TextureUsage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SwapchainInfo {
    pub swap_mode: SwapMode,
    /// Maximum number of frames rendered ahead of presentation.
    pub depth: usize,
}

impl Default for SwapchainInfo {
    fn default() -> Self {
        Self {
            swap_mode: SwapMode::Auto,
            depth: 3,
        }
    }
}
