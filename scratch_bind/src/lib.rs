//! Per frame GPU binding scratch.
//!
//! [`buffer_pool::BufferPool`] hands out uniform memory for the current frame and
//! [`descriptor_allocator::DescriptorSetAllocator`] hands out descriptor sets, skipping the
//! descriptor write when a set already holds the requested resources. Both recycle on a fixed
//! frame cadence driven by `begin_frame`. [`frame::FrameBinder`] ties them to command recording.
pub mod buffer_pool;
pub mod descriptor_allocator;
pub mod error;
pub mod frame;
pub mod prelude;
pub mod registry;

pub use error::ScratchError;

// Re-exports
pub use scratch_containers;
pub use vkgal;
