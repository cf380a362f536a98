//! Graphics abstraction layer for transient resource binding.
//!
//! Everything that touches the GPU goes through [`backend::Backend`]. A Vulkan implementation
//! lives behind the `gpu-allocator` feature, and [`backend::TestBackend`] records every call
//! without needing a device.
pub mod allocators;
pub mod backend;
pub mod descriptor;
pub mod error;
pub mod traits;
pub mod util;

pub use error::GalError;

// Re-exports
#[cfg(feature = "gpu-allocator")]
pub use gpu_allocator;
pub use ash;
