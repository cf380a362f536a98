use ash::vk;

/// A reference to a GPU resource as it is written into a binding table.
///
/// These are plain values: two references are equal exactly when they would produce the same
/// descriptor write, which is what lets a binding table's cached contents be compared without
/// touching the GPU.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// A byte range of a buffer
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    /// An image view, optionally paired with a sampler
    Image {
        sampler: vk::Sampler,
        image_view: vk::ImageView,
        layout: vk::ImageLayout,
    },
}

impl ResourceRef {
    pub fn buffer(buffer: vk::Buffer, offset: vk::DeviceSize, range: vk::DeviceSize) -> Self {
        Self::Buffer {
            buffer,
            offset,
            range,
        }
    }

    /// An image without a sampler, for sampled or storage image bindings
    pub fn image(image_view: vk::ImageView, layout: vk::ImageLayout) -> Self {
        Self::Image {
            sampler: vk::Sampler::null(),
            image_view,
            layout,
        }
    }

    pub fn combined(
        sampler: vk::Sampler,
        image_view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Self {
        Self::Image {
            sampler,
            image_view,
            layout,
        }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer { .. })
    }

    pub fn buffer_info(&self) -> Option<vk::DescriptorBufferInfo> {
        match *self {
            Self::Buffer {
                buffer,
                offset,
                range,
            } => Some(
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(offset)
                    .range(range),
            ),
            Self::Image { .. } => None,
        }
    }

    pub fn image_info(&self) -> Option<vk::DescriptorImageInfo> {
        match *self {
            Self::Image {
                sampler,
                image_view,
                layout,
            } => Some(
                vk::DescriptorImageInfo::default()
                    .sampler(sampler)
                    .image_view(image_view)
                    .image_layout(layout),
            ),
            Self::Buffer { .. } => None,
        }
    }

    pub fn references_buffer(&self, handle: vk::Buffer) -> bool {
        matches!(self, Self::Buffer { buffer, .. } if *buffer == handle)
    }

    pub fn references_image_view(&self, handle: vk::ImageView) -> bool {
        matches!(self, Self::Image { image_view, .. } if *image_view == handle)
    }

    pub fn references_sampler(&self, handle: vk::Sampler) -> bool {
        matches!(self, Self::Image { sampler, .. } if *sampler == handle)
    }
}
