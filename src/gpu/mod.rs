pub mod buffer_pool;
pub mod command_pool;
pub mod context;
pub mod device;
pub mod error;
pub mod null;
pub mod structs;
pub mod swapchain;
pub mod texture_pool;
pub mod timing;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use buffer_pool::{upload_texture, BufferPool, PooledBuffer};
pub use command_pool::{CmdSlot, CommandPool, SubmissionId, MAX_CMDS, MAX_CMD_DEPS, MAX_QUEUES};
pub use context::Context;
pub use device::{BufferTextureCopy, Device, Submission};
pub use error::*;
pub use structs::*;
pub use swapchain::{Swapchain, SwapchainFrame, SwapchainState};
pub use texture_pool::{TexRef, TexturePool, MAX_AGE};
pub use timing::{PassPerf, SampleRing, TimerPool, PERF_SAMPLE_COUNT};

#[cfg(feature = "vulkan")]
pub use vulkan::{VulkanDevice, VulkanDeviceInfo};
