use std::fmt;

#[cfg(feature = "vulkan")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanError {
    res: ash::vk::Result,
}

#[cfg(feature = "vulkan")]
impl VulkanError {
    pub fn result(&self) -> ash::vk::Result {
        self.res
    }
}

#[cfg(feature = "vulkan")]
impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vulkan Error: {}", self.res)
    }
}

#[derive(Debug)]
pub enum GPUError {
    /// Every command slot is still waiting on the GPU.
    ResourceExhausted,
    /// A fixed-size list (e.g. per-submission dependencies) is full.
    CapacityExceeded { limit: usize },
    AllocationFailure(String),
    UnsupportedConfiguration(String),
    /// The device rejected a queue submission. Never retried.
    SubmitError(Box<GPUError>),
    /// The swapchain is out of date; resize and try again.
    AcquireStale,
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
    InvalidHandle,
    Backend(String),
    #[cfg(feature = "vulkan")]
    VulkanError(VulkanError),
}

impl GPUError {
    /// Whether the caller can recover by backing off or reconfiguring.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GPUError::ResourceExhausted | GPUError::CapacityExceeded { .. } | GPUError::AcquireStale
        )
    }
}

impl fmt::Display for GPUError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GPUError::ResourceExhausted => write!(f, "No free command buffers!"),
            GPUError::CapacityExceeded { limit } => {
                write!(f, "Capacity of {} entries exceeded", limit)
            }
            GPUError::AllocationFailure(what) => write!(f, "Allocation failed: {}", what),
            GPUError::UnsupportedConfiguration(what) => {
                write!(f, "Unsupported configuration: {}", what)
            }
            GPUError::SubmitError(inner) => write!(f, "Submission rejected: {}", inner),
            GPUError::AcquireStale => write!(f, "Swapchain is out of date"),
            GPUError::InvalidState { expected, found } => {
                write!(f, "Invalid state: expected {}, found {}", expected, found)
            }
            GPUError::InvalidHandle => write!(f, "Stale or invalid handle"),
            GPUError::Backend(what) => write!(f, "Backend error: {}", what),
            #[cfg(feature = "vulkan")]
            GPUError::VulkanError(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for GPUError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GPUError::SubmitError(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

#[cfg(feature = "vulkan")]
impl From<ash::vk::Result> for GPUError {
    fn from(res: ash::vk::Result) -> Self {
        match res {
            ash::vk::Result::ERROR_OUT_OF_DATE_KHR => GPUError::AcquireStale,
            _ => GPUError::VulkanError(VulkanError { res }),
        }
    }
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;
