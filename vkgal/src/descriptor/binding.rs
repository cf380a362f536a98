use ash::vk;

use super::ResourceRef;

/// Type of resource a binding slot expects
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    /// Uniform buffer whose offset is supplied when the table is bound
    UniformBufferDynamic,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
}

impl BindingType {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            BindingType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            BindingType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            BindingType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        }
    }

    /// Whether the binding is written from a buffer range rather than an image
    pub fn takes_buffer(&self) -> bool {
        matches!(
            self,
            BindingType::UniformBuffer
                | BindingType::UniformBufferDynamic
                | BindingType::StorageBuffer
        )
    }

    /// Whether `resource` may be written into a binding of this type
    pub fn accepts(&self, resource: &ResourceRef) -> bool {
        match resource {
            ResourceRef::Buffer { .. } => self.takes_buffer(),
            ResourceRef::Image { sampler, .. } => match self {
                BindingType::CombinedImageSampler => *sampler != vk::Sampler::null(),
                BindingType::SampledImage | BindingType::StorageImage => true,
                _ => false,
            },
        }
    }
}

/// A single binding slot of a layout
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BindingDescription {
    pub binding: u32,
    pub ty: BindingType,
    pub stages: vk::ShaderStageFlags,
    /// Array size of the binding
    pub count: u32,
}

impl BindingDescription {
    /// A single descriptor visible to every stage
    pub fn new(binding: u32, ty: BindingType) -> Self {
        Self {
            binding,
            ty,
            stages: vk::ShaderStageFlags::ALL,
            count: 1,
        }
    }

    pub fn stages(mut self, stages: vk::ShaderStageFlags) -> Self {
        self.stages = stages;
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        self.ty.descriptor_type()
    }
}
