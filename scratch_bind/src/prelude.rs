pub use super::buffer_pool::{
    ArenaNode, BufferPool, BufferPoolCreateInfo, BufferPoolStats, UniformAllocation,
};
pub use super::descriptor_allocator::{
    BindingSlot, DescriptorAllocatorCreateInfo, DescriptorAllocatorStats, DescriptorSetAllocator,
};
pub use super::error::ScratchError;
pub use super::frame::{DrawBinding, FrameBinder, FrameBinderCreateInfo, FramePacer};
pub use super::registry::{LayoutHandle, LayoutRegistry, LayoutRegistryCreateInfo};
pub use vkgal::backend::{Backend, DeviceLimits, TestBackend};
pub use vkgal::descriptor::{
    BindingDescription, BindingType, ResourceRef, SetLayoutBuilder, SetLayoutDescription,
};
