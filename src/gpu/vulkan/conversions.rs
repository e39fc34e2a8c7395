use ash::vk;

use crate::gpu::{
    BufferKind, CompositeAlpha, Extent2D, Format, GPUError, PipelineStage, PresentMode,
    SurfaceCapabilities, SurfaceTransform, TextureUsage,
};

impl From<PresentMode> for vk::PresentModeKHR {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        }
    }
}

pub(super) fn vk_to_lib_present_mode(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

impl From<PipelineStage> for vk::PipelineStageFlags {
    fn from(stage: PipelineStage) -> Self {
        // Bit values are shared with Vulkan.
        vk::PipelineStageFlags::from_raw(stage.bits())
    }
}

impl From<CompositeAlpha> for vk::CompositeAlphaFlagsKHR {
    fn from(alpha: CompositeAlpha) -> Self {
        vk::CompositeAlphaFlagsKHR::from_raw(alpha.bits())
    }
}

impl From<SurfaceTransform> for vk::SurfaceTransformFlagsKHR {
    fn from(transform: SurfaceTransform) -> Self {
        vk::SurfaceTransformFlagsKHR::from_raw(transform.bits())
    }
}

impl From<TextureUsage> for vk::ImageUsageFlags {
    fn from(usage: TextureUsage) -> Self {
        let mut flags = vk::ImageUsageFlags::empty();
        if usage.contains(TextureUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if usage.contains(TextureUsage::RENDER_TARGET) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if usage.contains(TextureUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if usage.contains(TextureUsage::BLIT_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if usage.intersects(TextureUsage::BLIT_DST | TextureUsage::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

pub(super) fn vk_to_lib_usage(flags: vk::ImageUsageFlags) -> TextureUsage {
    let mut usage = TextureUsage::empty();
    if flags.contains(vk::ImageUsageFlags::SAMPLED) {
        usage |= TextureUsage::SAMPLED;
    }
    if flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        usage |= TextureUsage::RENDER_TARGET;
    }
    if flags.contains(vk::ImageUsageFlags::STORAGE) {
        usage |= TextureUsage::STORAGE;
    }
    if flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        usage |= TextureUsage::BLIT_SRC;
    }
    if flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        usage |= TextureUsage::BLIT_DST | TextureUsage::TRANSFER_DST;
    }
    usage
}

impl From<BufferKind> for vk::BufferUsageFlags {
    fn from(kind: BufferKind) -> Self {
        match kind {
            BufferKind::TexUpload => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferKind::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
        }
    }
}

pub(super) fn lib_to_vk_image_format(fmt: &Format) -> vk::Format {
    match fmt {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::RGB565 => vk::Format::R5G6B5_UNORM_PACK16,
        Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::BGRA8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::RGBA8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::A2BGR10 => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::RGBA16F => vk::Format::R16G16B16A16_SFLOAT,
        Format::RGBA32F => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub(super) fn vk_to_lib_image_format(fmt: vk::Format) -> Result<Format, GPUError> {
    match fmt {
        vk::Format::R8_UNORM => Ok(Format::R8Unorm),
        vk::Format::R5G6B5_UNORM_PACK16 => Ok(Format::RGB565),
        vk::Format::B8G8R8A8_UNORM => Ok(Format::BGRA8Unorm),
        vk::Format::B8G8R8A8_SRGB => Ok(Format::BGRA8Srgb),
        vk::Format::R8G8B8A8_UNORM => Ok(Format::RGBA8Unorm),
        vk::Format::R8G8B8A8_SRGB => Ok(Format::RGBA8Srgb),
        vk::Format::A2B10G10R10_UNORM_PACK32 => Ok(Format::A2BGR10),
        vk::Format::R16G16B16A16_SFLOAT => Ok(Format::RGBA16F),
        vk::Format::R32G32B32A32_SFLOAT => Ok(Format::RGBA32F),
        other => Err(GPUError::UnsupportedConfiguration(format!(
            "surface format {:?}",
            other
        ))),
    }
}

fn vk_to_lib_extent(extent: vk::Extent2D) -> Extent2D {
    Extent2D::new(extent.width, extent.height)
}

impl From<&vk::SurfaceCapabilitiesKHR> for SurfaceCapabilities {
    fn from(caps: &vk::SurfaceCapabilitiesKHR) -> Self {
        let current_extent = if caps.current_extent.width == u32::MAX {
            None
        } else {
            Some(vk_to_lib_extent(caps.current_extent))
        };

        SurfaceCapabilities {
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent,
            min_extent: vk_to_lib_extent(caps.min_image_extent),
            max_extent: vk_to_lib_extent(caps.max_image_extent),
            supported_alpha: CompositeAlpha::from_bits_truncate(
                caps.supported_composite_alpha.as_raw(),
            ),
            supported_transforms: SurfaceTransform::from_bits_truncate(
                caps.supported_transforms.as_raw(),
            ),
            supported_usage: vk_to_lib_usage(caps.supported_usage_flags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_round_trip() {
        for fmt in [Format::BGRA8Unorm, Format::A2BGR10, Format::RGBA16F] {
            assert_eq!(vk_to_lib_image_format(lib_to_vk_image_format(&fmt)).unwrap(), fmt);
        }
        assert!(vk_to_lib_image_format(vk::Format::D24_UNORM_S8_UINT).is_err());
    }

    #[test]
    fn flag_values_match_vulkan() {
        assert_eq!(
            vk::PipelineStageFlags::from(PipelineStage::COLOR_ATTACHMENT_OUTPUT),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            vk::CompositeAlphaFlagsKHR::from(CompositeAlpha::POST_MULTIPLIED),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
        assert_eq!(
            vk::SurfaceTransformFlagsKHR::from(SurfaceTransform::INHERIT),
            vk::SurfaceTransformFlagsKHR::INHERIT
        );
    }

    #[test]
    fn undefined_current_extent_maps_to_none() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        };
        let caps = SurfaceCapabilities::from(&caps);
        assert!(caps.current_extent.is_none());
        assert_eq!(caps.supported_alpha, CompositeAlpha::OPAQUE);
    }
}
