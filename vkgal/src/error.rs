use std::sync::PoisonError;

use ash::vk;
/// Possible errors
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalError {
    #[error("Poisoned mutex")]
    PoisonError,

    #[error("Vulkan resource does not have a mapped pointer. You're most likely using GPU only")]
    NoMappedPointer,

    #[error("Insufficient space to upload the data")]
    InsufficientSpace,

    #[error("Allocation error")]
    AllocationError,

    #[error("Size computation overflowed")]
    SizeOverflow,

    #[error("Layout declares {got} bindings, at most {max} are supported")]
    TooManyBindings { max: usize, got: usize },

    #[error("Binding {binding} was declared twice with a different type or array size")]
    BindingConflict { binding: u32 },

    #[error("Binding {binding} is invalid: {reason}")]
    InvalidBinding { binding: u32, reason: &'static str },

    #[error("Expected {expected} resource references for this layout, got {got}")]
    ResourceCountMismatch { expected: usize, got: usize },

    #[error("Resource reference {index} (binding {binding}) does not match the declared {expected:?}")]
    ResourceTypeMismatch {
        index: usize,
        binding: u32,
        expected: vk::DescriptorType,
    },

    #[error("Test backend was told to fail this creation")]
    InjectedFailure,

    #[error(transparent)]
    VkError(#[from] vk::Result),

    #[cfg(feature = "gpu-allocator")]
    #[error(transparent)]
    GpuAllocator(#[from] gpu_allocator::AllocationError),
}

impl<T> From<PoisonError<T>> for GalError {
    fn from(_: PoisonError<T>) -> Self {
        GalError::PoisonError
    }
}
