//! The device seam.
//!
//! Allocators never call into Vulkan directly. They hold a [`Backend`] (a cheap clone of a shared
//! device handle) and go through it for buffer memory, descriptor objects and command recording.

use std::fmt::Debug;

use ash::vk;

use crate::allocators::MemoryLocation;
use crate::descriptor::{ResourceRef, SetLayoutDescription};
use crate::GalError;

pub mod test_backend;
#[cfg(feature = "gpu-allocator")]
pub mod vulkan;

pub use test_backend::{RecordedBind, TestBackend, TestBuffer, TestCounters};
#[cfg(feature = "gpu-allocator")]
pub use vulkan::{VulkanBackend, VulkanHostBuffer};

/// Device limits the transient allocators care about
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceLimits {
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    pub min_storage_buffer_offset_alignment: vk::DeviceSize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        // Worst case across desktop drivers
        Self {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
        }
    }
}

impl DeviceLimits {
    /// Offset alignment every binding of a buffer with `usage` must respect
    pub fn offset_alignment(&self, usage: vk::BufferUsageFlags) -> vk::DeviceSize {
        let mut alignment = 1;
        if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            alignment = alignment.max(self.min_uniform_buffer_offset_alignment);
        }
        if usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
            alignment = alignment.max(self.min_storage_buffer_offset_alignment);
        }
        alignment
    }
}

#[derive(Debug, Clone)]
pub struct HostBufferCreateInfo<'a> {
    pub name: &'a str,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

/// A persistently mapped buffer. Dropping it returns the buffer and its memory to the device.
pub trait HostBuffer: Debug + Send {
    fn handle(&self) -> vk::Buffer;

    fn size(&self) -> vk::DeviceSize;

    fn mapped_slice(&self) -> Option<&[u8]>;

    fn mapped_slice_mut(&mut self) -> Option<&mut [u8]>;
}

pub trait Backend: Clone + Send + Sync {
    type Buffer: HostBuffer;

    fn name(&self) -> &'static str;

    fn limits(&self) -> DeviceLimits;

    fn create_host_buffer(
        &self,
        create_info: &HostBufferCreateInfo<'_>,
    ) -> Result<Self::Buffer, GalError>;

    fn create_descriptor_set_layout(
        &self,
        description: &SetLayoutDescription,
    ) -> Result<vk::DescriptorSetLayout, GalError>;

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Create a pool able to hold `max_sets` tables of `description`
    fn create_descriptor_pool(
        &self,
        description: &SetLayoutDescription,
        max_sets: u32,
    ) -> Result<vk::DescriptorPool, GalError>;

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, GalError>;

    /// Overwrite every binding of `set` in a single update call.
    ///
    /// `resources` must already have passed [`SetLayoutDescription::check`].
    fn write_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        description: &SetLayoutDescription,
        resources: &[ResourceRef],
    );

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    );
}
