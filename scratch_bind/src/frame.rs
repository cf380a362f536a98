//! Frame pacing and command time binding.

use derivative::Derivative;
use tracing::trace;
use vkgal::ash::vk;
use vkgal::backend::Backend;
use vkgal::descriptor::{BindingType, ResourceRef, SetLayoutDescription};

use crate::buffer_pool::{BufferPool, BufferPoolCreateInfo, UniformAllocation};
use crate::error::ScratchError;
use crate::registry::{LayoutHandle, LayoutRegistry, LayoutRegistryCreateInfo};

/// Tracks which frame last recorded into each frame slot and which frames the GPU has finished.
///
/// Frames are numbered from zero and retire in submission order, so a single watermark is enough.
#[derive(Debug, Clone)]
pub struct FramePacer {
    // frame number that last recorded into each slot
    slot_frames: Vec<Option<u64>>,
    current_slot: usize,
    frame: u64,
    retired: Option<u64>,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize) -> Result<Self, ScratchError> {
        if frames_in_flight == 0 {
            return Err(ScratchError::InvalidConfig("frames_in_flight must be at least 1"));
        }
        let mut slot_frames = vec![None; frames_in_flight];
        slot_frames[0] = Some(0);
        Ok(Self {
            slot_frames,
            current_slot: 0,
            frame: 0,
            retired: None,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slot_frames.len()
    }

    /// Frame currently being recorded
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Highest frame the GPU is known to have finished
    pub fn retired(&self) -> Option<u64> {
        self.retired
    }

    /// Mark `frame` and every frame before it as finished on the GPU, e.g. after its fence signaled.
    ///
    /// Frames that have not been recorded yet cannot have finished and are rejected.
    pub fn retire(&mut self, frame: u64) -> Result<(), ScratchError> {
        if frame > self.frame {
            return Err(ScratchError::RetireFromFuture {
                frame,
                current: self.frame,
            });
        }
        self.retired = Some(self.retired.map_or(frame, |retired| retired.max(frame)));
        Ok(())
    }

    fn is_retired(&self, frame: u64) -> bool {
        self.retired.is_some_and(|retired| retired >= frame)
    }

    /// Frame that must retire before the next slot can be reused, if any
    pub fn blocking_frame(&self) -> Option<u64> {
        let next = (self.current_slot + 1) % self.slot_frames.len();
        self.slot_frames[next].filter(|frame| !self.is_retired(*frame))
    }

    /// Move to the next frame. Fails if the frame that last used the next slot is still in flight.
    pub fn advance(&mut self) -> Result<usize, ScratchError> {
        let next = (self.current_slot + 1) % self.slot_frames.len();
        if let Some(frame) = self.blocking_frame() {
            return Err(ScratchError::FrameInFlight { frame, slot: next });
        }
        self.frame += 1;
        self.current_slot = next;
        self.slot_frames[next] = Some(self.frame);
        Ok(next)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameBinderCreateInfo {
    pub buffer_pool: BufferPoolCreateInfo,
    pub registry: LayoutRegistryCreateInfo,
}

/// Everything needed to bind one draw's descriptor set
#[derive(Debug, Clone)]
pub struct DrawBinding<'a> {
    pub layout: LayoutHandle,
    pub bind_point: vk::PipelineBindPoint,
    pub pipeline_layout: vk::PipelineLayout,
    pub set_index: u32,
    /// Uniform payload written into scratch memory and bound first
    pub uniform: Option<&'a [u8]>,
    /// References for the remaining bindings, binding-major
    pub resources: &'a [ResourceRef],
}

/// Bind time offsets are 32 bit in Vulkan
fn dynamic_offset(offset: vk::DeviceSize) -> Result<u32, ScratchError> {
    u32::try_from(offset).map_err(|_| ScratchError::DynamicOffsetOutOfRange { offset })
}

/// Owns the transient allocators of a renderer and binds per draw scratch data.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct FrameBinder<B: Backend> {
    #[derivative(Debug = "ignore")]
    backend: B,
    buffer_pool: BufferPool<B>,
    registry: LayoutRegistry<B>,
    pacer: FramePacer,
    #[derivative(Debug = "ignore")]
    scratch_refs: Vec<ResourceRef>,
}

impl<B: Backend> FrameBinder<B> {
    pub fn new(backend: B, create_info: FrameBinderCreateInfo) -> Result<Self, ScratchError> {
        let frames_in_flight = create_info.buffer_pool.frames_in_flight;
        if create_info.registry.allocator.frames_in_flight != frames_in_flight {
            return Err(ScratchError::InvalidConfig(
                "buffer pool and descriptor allocators must agree on frames_in_flight",
            ));
        }
        let alignment = backend
            .limits()
            .offset_alignment(create_info.buffer_pool.usage);
        let (partition_size, node_capacity) = create_info.buffer_pool.node_size(alignment)?;
        // the last partition of a node must still be reachable as a dynamic offset
        if dynamic_offset(node_capacity - partition_size).is_err() {
            return Err(ScratchError::InvalidConfig(
                "buffer pool nodes must keep every offset within 32 bits",
            ));
        }
        let pacer = FramePacer::new(frames_in_flight)?;
        let buffer_pool = BufferPool::new(backend.clone(), create_info.buffer_pool)?;
        let registry = LayoutRegistry::new(backend.clone(), create_info.registry)?;
        Ok(Self {
            backend,
            buffer_pool,
            registry,
            pacer,
            scratch_refs: Vec::new(),
        })
    }

    pub fn buffer_pool(&mut self) -> &mut BufferPool<B> {
        &mut self.buffer_pool
    }

    pub fn registry(&mut self) -> &mut LayoutRegistry<B> {
        &mut self.registry
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    pub fn register_layout(
        &mut self,
        description: &SetLayoutDescription,
    ) -> Result<LayoutHandle, ScratchError> {
        self.registry.get_or_create(description)
    }

    /// Record that the GPU finished `frame`
    pub fn retire(&mut self, frame: u64) -> Result<(), ScratchError> {
        self.pacer.retire(frame)
    }

    /// Start the next frame, recycling the memory and sets of the frame slot it reuses.
    ///
    /// Returns the new frame number.
    pub fn begin_frame(&mut self) -> Result<u64, ScratchError> {
        self.pacer.advance()?;
        self.buffer_pool.begin_frame();
        self.registry.begin_frame();
        trace!(
            "Frame {} in slot {}",
            self.pacer.current_frame(),
            self.pacer.current_slot()
        );
        Ok(self.pacer.current_frame())
    }

    /// Write the draw's uniform data, obtain a set for it and record the bind into `cmd`
    pub fn bind_draw(
        &mut self,
        cmd: vk::CommandBuffer,
        draw: &DrawBinding<'_>,
    ) -> Result<vk::DescriptorSet, ScratchError> {
        let description = self.registry.description(draw.layout)?;
        let dynamic = description
            .bindings()
            .first()
            .is_some_and(|binding| binding.ty == BindingType::UniformBufferDynamic);

        self.scratch_refs.clear();
        let mut dynamic_offsets: Vec<u32> = Vec::new();
        if let Some(uniform) = draw.uniform {
            let allocation: UniformAllocation = self.buffer_pool.push_bytes(uniform)?;
            if dynamic {
                // The set stays the same across draws; only the bind time offset moves
                self.scratch_refs
                    .push(ResourceRef::buffer(allocation.buffer, 0, allocation.range()));
                dynamic_offsets.push(dynamic_offset(allocation.offset)?);
            } else {
                self.scratch_refs.push(allocation.resource_ref());
            }
        }
        self.scratch_refs.extend_from_slice(draw.resources);

        let set = self.registry.alloc(draw.layout, &self.scratch_refs)?;
        self.backend.cmd_bind_descriptor_set(
            cmd,
            draw.bind_point,
            draw.pipeline_layout,
            draw.set_index,
            set,
            &dynamic_offsets,
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_allocator::DescriptorAllocatorCreateInfo;
    use vkgal::ash::vk::Handle;
    use vkgal::backend::TestBackend;
    use vkgal::descriptor::SetLayoutBuilder;

    #[test]
    fn test_pacer_requires_retirement() {
        let mut pacer = FramePacer::new(2).unwrap();
        assert_eq!(pacer.advance().unwrap(), 1);
        assert_eq!(pacer.current_frame(), 1);
        // slot 0 still belongs to frame 0
        assert!(matches!(
            pacer.advance(),
            Err(ScratchError::FrameInFlight { frame: 0, slot: 0 })
        ));
        pacer.retire(0).unwrap();
        assert_eq!(pacer.advance().unwrap(), 0);
        assert_eq!(pacer.current_frame(), 2);
        assert_eq!(pacer.blocking_frame(), Some(1));
        // retirement is a watermark
        pacer.retire(2).unwrap();
        pacer.retire(1).unwrap();
        assert_eq!(pacer.retired(), Some(2));
        assert_eq!(pacer.blocking_frame(), None);
    }

    #[test]
    fn test_pacer_rejects_unrecorded_frames() {
        let mut pacer = FramePacer::new(2).unwrap();
        assert!(matches!(
            pacer.retire(4),
            Err(ScratchError::RetireFromFuture {
                frame: 4,
                current: 0
            })
        ));
        assert_eq!(pacer.retired(), None);
        assert_eq!(pacer.advance().unwrap(), 1);
        // frame 0 was never retired, so the guard still holds
        assert!(matches!(
            pacer.advance(),
            Err(ScratchError::FrameInFlight { frame: 0, slot: 0 })
        ));
        assert_eq!(pacer.current_frame(), 1);
    }

    #[test]
    fn test_pacer_single_frame() {
        let mut pacer = FramePacer::new(1).unwrap();
        assert!(pacer.advance().is_err());
        pacer.retire(0).unwrap();
        assert_eq!(pacer.advance().unwrap(), 0);
        assert!(FramePacer::new(0).is_err());
    }

    fn binder(backend: &TestBackend) -> FrameBinder<TestBackend> {
        FrameBinder::new(backend.clone(), FrameBinderCreateInfo::default()).unwrap()
    }

    fn draw<'a>(
        layout: LayoutHandle,
        uniform: Option<&'a [u8]>,
        resources: &'a [ResourceRef],
    ) -> DrawBinding<'a> {
        DrawBinding {
            layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            pipeline_layout: vk::PipelineLayout::from_raw(40),
            set_index: 0,
            uniform,
            resources,
        }
    }

    #[test]
    fn test_bind_draw() {
        let backend = TestBackend::new();
        let mut binder = binder(&backend);
        let layout = binder
            .register_layout(
                &SetLayoutBuilder::default()
                    .add_binding(0, BindingType::UniformBuffer)
                    .add_binding(1, BindingType::SampledImage)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let texture = ResourceRef::image(
            vk::ImageView::from_raw(9),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let cmd = vk::CommandBuffer::from_raw(1);
        let uniform = [1u8; 64];
        let set = binder
            .bind_draw(cmd, &draw(layout, Some(&uniform[..]), &[texture]))
            .unwrap();

        let contents = backend.contents(set).unwrap();
        assert_eq!(contents.len(), 2);
        assert!(contents[0].is_buffer());
        assert_eq!(contents[1], texture);
        let binds = backend.binds();
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].set, set);
        assert!(binds[0].dynamic_offsets.is_empty());

        // each draw has its own uniform range, so a new set is written
        let second = binder
            .bind_draw(cmd, &draw(layout, Some(&uniform[..]), &[texture]))
            .unwrap();
        assert_ne!(set, second);
        assert_eq!(backend.counters().descriptor_writes, 2);
    }

    #[test]
    fn test_bind_draw_dynamic_uniform() {
        let backend = TestBackend::new();
        let mut binder = binder(&backend);
        let layout = binder
            .register_layout(
                &SetLayoutBuilder::default()
                    .add_binding(0, BindingType::UniformBufferDynamic)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let cmd = vk::CommandBuffer::from_raw(1);
        let first = binder
            .bind_draw(cmd, &draw(layout, Some(&[0u8; 16][..]), &[]))
            .unwrap();
        let second = binder
            .bind_draw(cmd, &draw(layout, Some(&[1u8; 16][..]), &[]))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.counters().descriptor_writes, 1);
        let binds = backend.binds();
        assert_eq!(binds[0].dynamic_offsets, vec![0]);
        assert_eq!(binds[1].dynamic_offsets, vec![256]);
    }

    #[test]
    fn test_begin_frame_paces() {
        let backend = TestBackend::new();
        let mut binder = binder(&backend);
        assert_eq!(binder.begin_frame().unwrap(), 1);
        assert!(matches!(
            binder.begin_frame(),
            Err(ScratchError::FrameInFlight { frame: 0, .. })
        ));
        // nothing was recycled by the refused call
        assert_eq!(binder.buffer_pool().current_frame(), 1);
        assert!(binder.retire(2).is_err());
        assert!(binder.begin_frame().is_err());
        binder.retire(0).unwrap();
        assert_eq!(binder.begin_frame().unwrap(), 2);
        assert_eq!(binder.buffer_pool().current_slot(), 0);
    }

    #[test]
    fn test_dynamic_offset_range() {
        assert_eq!(dynamic_offset(256).unwrap(), 256);
        assert_eq!(dynamic_offset(u32::MAX as u64).unwrap(), u32::MAX);
        assert!(matches!(
            dynamic_offset(1 << 32),
            Err(ScratchError::DynamicOffsetOutOfRange { offset }) if offset == 1 << 32
        ));
    }

    #[test]
    fn test_rejects_nodes_beyond_dynamic_offsets() {
        let backend = TestBackend::new();
        // 8 GiB nodes, validated before anything is allocated
        let create_info = FrameBinderCreateInfo {
            buffer_pool: BufferPoolCreateInfo::default()
                .partition_size(1 << 20)
                .partitions_per_node(1 << 13),
            ..Default::default()
        };
        assert!(matches!(
            FrameBinder::new(backend.clone(), create_info),
            Err(ScratchError::InvalidConfig(_))
        ));
        assert_eq!(backend.counters().buffers_created, 0);

        // overflowing sizes surface as configuration errors too
        let create_info = FrameBinderCreateInfo {
            buffer_pool: BufferPoolCreateInfo::default()
                .partition_size(1 << 40)
                .partitions_per_node(1 << 30),
            ..Default::default()
        };
        assert!(matches!(
            FrameBinder::new(backend.clone(), create_info),
            Err(ScratchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_mismatched_frames_in_flight() {
        let backend = TestBackend::new();
        let create_info = FrameBinderCreateInfo {
            buffer_pool: BufferPoolCreateInfo::default().frames_in_flight(3),
            registry: LayoutRegistryCreateInfo::default()
                .allocator(DescriptorAllocatorCreateInfo::default().frames_in_flight(2)),
        };
        assert!(matches!(
            FrameBinder::new(backend, create_info),
            Err(ScratchError::InvalidConfig(_))
        ));
    }
}
