//! Command submission and resource pooling for explicit GPU APIs.
//!
//! [`Context`] owns the command pools; [`BufferPool`], [`TexturePool`],
//! [`Swapchain`] and [`TimerPool`] recycle resources across frames on top of
//! them. Everything is generic over [`Device`], with a Vulkan backend behind
//! the `vulkan` feature and the headless [`gpu::null::NullDevice`].

pub mod diagnostics;
pub mod gpu;
pub mod utils;

pub use gpu::*;
pub use utils::{Handle, Pool, RingIndex};
