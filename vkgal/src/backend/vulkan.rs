use std::sync::{Arc, Mutex};

use ash::vk;
use derivative::Derivative;
use gpu_allocator::vulkan as gpu;
#[allow(unused_imports)]
use tracing::{error, trace};

use super::{Backend, DeviceLimits, HostBuffer, HostBufferCreateInfo};
use crate::descriptor::{ResourceRef, SetLayoutDescription};
use crate::GalError;

#[derive(Derivative)]
#[derivative(Debug)]
struct VulkanInner {
    #[derivative(Debug = "ignore")]
    device: ash::Device,
    #[derivative(Debug = "ignore")]
    allocator: Mutex<gpu::Allocator>,
    limits: DeviceLimits,
}

/// [`Backend`] over an `ash` device with memory from `gpu-allocator`.
///
/// The caller keeps ownership of the device and must keep it alive until every clone of the
/// backend and every buffer created through it has been dropped.
#[derive(Clone, Debug)]
pub struct VulkanBackend {
    inner: Arc<VulkanInner>,
}

impl VulkanBackend {
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, GalError> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: properties
                .limits
                .min_storage_buffer_offset_alignment,
        };
        let allocator = gpu::Allocator::new(&gpu::AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        Ok(Self {
            inner: Arc::new(VulkanInner {
                device: device.clone(),
                allocator: Mutex::new(allocator),
                limits,
            }),
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.inner.device
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct VulkanHostBuffer {
    handle: vk::Buffer,
    size: vk::DeviceSize,
    #[derivative(Debug = "ignore")]
    allocation: Option<gpu::Allocation>,
    #[derivative(Debug = "ignore")]
    backend: Arc<VulkanInner>,
}

impl HostBuffer for VulkanHostBuffer {
    fn handle(&self) -> vk::Buffer {
        self.handle
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn mapped_slice(&self) -> Option<&[u8]> {
        self.allocation.as_ref()?.mapped_slice()
    }

    fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.allocation.as_mut()?.mapped_slice_mut()
    }
}

impl Drop for VulkanHostBuffer {
    fn drop(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkBuffer {:?}", self.handle);

        unsafe {
            self.backend.device.destroy_buffer(self.handle, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.backend.allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer memory: {e}");
                    }
                }
                Err(_) => error!("Allocator mutex poisoned, leaking buffer memory"),
            }
        }
    }
}

impl Backend for VulkanBackend {
    type Buffer = VulkanHostBuffer;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn limits(&self) -> DeviceLimits {
        self.inner.limits
    }

    fn create_host_buffer(
        &self,
        create_info: &HostBufferCreateInfo<'_>,
    ) -> Result<Self::Buffer, GalError> {
        let device = &self.inner.device;
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(create_info.size)
            .usage(create_info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { device.create_buffer(&buffer_ci, None)? };
        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkBuffer {:?} ({})", handle, create_info.name);

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let allocation = {
            let mut allocator = self.inner.allocator.lock()?;
            allocator.allocate(&gpu::AllocationCreateDesc {
                name: create_info.name,
                requirements,
                location: create_info.location.into(),
                linear: true,
                allocation_scheme: gpu::AllocationScheme::GpuAllocatorManaged,
            })
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(e.into());
            }
        };
        #[cfg(feature = "log-memory-allocations")]
        trace!(
            "Allocated {} bytes at offset {} for {}",
            allocation.size(),
            allocation.offset(),
            create_info.name
        );

        // The buffer owns the allocation from here, so its Drop cleans up on failure
        let buffer = VulkanHostBuffer {
            handle,
            size: create_info.size,
            allocation: Some(allocation),
            backend: self.inner.clone(),
        };
        if let Some(allocation) = buffer.allocation.as_ref() {
            unsafe {
                device.bind_buffer_memory(handle, allocation.memory(), allocation.offset())?;
            }
        }
        if create_info.location.is_host_visible() && buffer.mapped_slice().is_none() {
            return Err(GalError::NoMappedPointer);
        }
        Ok(buffer)
    }

    fn create_descriptor_set_layout(
        &self,
        description: &SetLayoutDescription,
    ) -> Result<vk::DescriptorSetLayout, GalError> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = description
            .bindings()
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type())
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe {
            self.inner
                .device
                .create_descriptor_set_layout(&layout_ci, None)?
        };
        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkDescriptorSetLayout {:?}", layout);
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkDescriptorSetLayout {:?}", layout);
        unsafe {
            self.inner
                .device
                .destroy_descriptor_set_layout(layout, None);
        }
    }

    fn create_descriptor_pool(
        &self,
        description: &SetLayoutDescription,
        max_sets: u32,
    ) -> Result<vk::DescriptorPool, GalError> {
        let sizes = description.pool_sizes(max_sets)?;
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { self.inner.device.create_descriptor_pool(&pool_ci, None)? };
        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkDescriptorPool {:?}", pool);
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkDescriptorPool {:?}", pool);
        unsafe {
            self.inner.device.destroy_descriptor_pool(pool, None);
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, GalError> {
        let layouts = vec![layout; count as usize];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        Ok(unsafe { self.inner.device.allocate_descriptor_sets(&allocate_info)? })
    }

    fn write_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        description: &SetLayoutDescription,
        resources: &[ResourceRef],
    ) {
        // Infos must outlive the writes that point at them
        let mut buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>> = Vec::new();
        let mut image_infos: Vec<Vec<vk::DescriptorImageInfo>> = Vec::new();
        for (binding, chunk) in description.split(resources) {
            if binding.ty.takes_buffer() {
                buffer_infos.push(chunk.iter().filter_map(ResourceRef::buffer_info).collect());
            } else {
                image_infos.push(chunk.iter().filter_map(ResourceRef::image_info).collect());
            }
        }

        let mut buffers = buffer_infos.iter();
        let mut images = image_infos.iter();
        let mut writes: Vec<vk::WriteDescriptorSet> =
            Vec::with_capacity(description.binding_count());
        for binding in description.bindings() {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(binding.binding)
                .dst_array_element(0)
                .descriptor_type(binding.descriptor_type());
            let write = if binding.ty.takes_buffer() {
                match buffers.next() {
                    Some(infos) => write.buffer_info(infos),
                    None => continue,
                }
            } else {
                match images.next() {
                    Some(infos) => write.image_info(infos),
                    None => continue,
                }
            };
            writes.push(write);
        }

        unsafe {
            self.inner.device.update_descriptor_sets(&writes, &[]);
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.inner.device.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                pipeline_layout,
                set_index,
                &[set],
                dynamic_offsets,
            );
        }
    }
}
