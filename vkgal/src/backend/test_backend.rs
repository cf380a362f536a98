use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use ash::vk::Handle;
use derivative::Derivative;

use super::{Backend, DeviceLimits, HostBuffer, HostBufferCreateInfo};
use crate::descriptor::{ResourceRef, SetLayoutDescription};
use crate::GalError;

/// Running totals of everything a [`TestBackend`] was asked to do
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TestCounters {
    pub buffers_created: u32,
    pub live_buffers: u32,
    pub layouts_created: u32,
    pub live_layouts: u32,
    pub pools_created: u32,
    pub live_pools: u32,
    pub sets_allocated: u32,
    pub descriptor_writes: u32,
    pub binds: u32,
}

/// Arguments of a recorded `cmd_bind_descriptor_set`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBind {
    pub cmd: vk::CommandBuffer,
    pub bind_point: vk::PipelineBindPoint,
    pub pipeline_layout: vk::PipelineLayout,
    pub set_index: u32,
    pub set: vk::DescriptorSet,
    pub dynamic_offsets: Vec<u32>,
}

#[derive(Debug, Default)]
struct PoolRecord {
    max_sets: u32,
    allocated: u32,
}

#[derive(Debug, Default)]
struct TestState {
    next_handle: u64,
    counters: TestCounters,
    /// Number of creations left before one is made to fail
    fail_after: Option<u32>,
    pools: HashMap<vk::DescriptorPool, PoolRecord>,
    contents: HashMap<vk::DescriptorSet, Vec<ResourceRef>>,
    binds: Vec<RecordedBind>,
}

impl TestState {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check_injection(&mut self) -> Result<(), GalError> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                Err(GalError::InjectedFailure)
            }
            Some(remaining) => {
                self.fail_after = Some(remaining - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// A device-less backend.
///
/// Handles are fabricated from a counter, host buffers are plain byte vectors, and every call is
/// counted so callers can assert exactly how much work reached the "device". Clones share state.
#[derive(Clone, Debug)]
pub struct TestBackend {
    state: Arc<Mutex<TestState>>,
    limits: DeviceLimits,
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBackend {
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            state: Arc::new(Mutex::new(TestState::default())),
            limits,
        }
    }

    fn state(&self) -> MutexGuard<'_, TestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let `n` more resource creations succeed, then fail the next one
    pub fn fail_after(&self, n: u32) {
        self.state().fail_after = Some(n);
    }

    pub fn counters(&self) -> TestCounters {
        self.state().counters
    }

    /// What was last written into `set`
    pub fn contents(&self, set: vk::DescriptorSet) -> Option<Vec<ResourceRef>> {
        self.state().contents.get(&set).cloned()
    }

    pub fn binds(&self) -> Vec<RecordedBind> {
        self.state().binds.clone()
    }
}

/// Host memory standing in for a mapped buffer
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TestBuffer {
    handle: vk::Buffer,
    size: vk::DeviceSize,
    #[derivative(Debug = "ignore")]
    data: Option<Vec<u8>>,
    #[derivative(Debug = "ignore")]
    state: Arc<Mutex<TestState>>,
}

impl HostBuffer for TestBuffer {
    fn handle(&self) -> vk::Buffer {
        self.handle
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn mapped_slice(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.data.as_deref_mut()
    }
}

impl Drop for TestBuffer {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.counters.live_buffers = state.counters.live_buffers.saturating_sub(1);
    }
}

impl Backend for TestBackend {
    type Buffer = TestBuffer;

    fn name(&self) -> &'static str {
        "test"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_host_buffer(
        &self,
        create_info: &HostBufferCreateInfo<'_>,
    ) -> Result<Self::Buffer, GalError> {
        let mut state = self.state();
        state.check_injection()?;
        let handle = vk::Buffer::from_raw(state.next_raw());
        state.counters.buffers_created += 1;
        state.counters.live_buffers += 1;
        let data = create_info
            .location
            .is_host_visible()
            .then(|| vec![0u8; create_info.size as usize]);
        Ok(TestBuffer {
            handle,
            size: create_info.size,
            data,
            state: self.state.clone(),
        })
    }

    fn create_descriptor_set_layout(
        &self,
        _description: &SetLayoutDescription,
    ) -> Result<vk::DescriptorSetLayout, GalError> {
        let mut state = self.state();
        state.check_injection()?;
        state.counters.layouts_created += 1;
        state.counters.live_layouts += 1;
        Ok(vk::DescriptorSetLayout::from_raw(state.next_raw()))
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        let mut state = self.state();
        state.counters.live_layouts = state.counters.live_layouts.saturating_sub(1);
    }

    fn create_descriptor_pool(
        &self,
        description: &SetLayoutDescription,
        max_sets: u32,
    ) -> Result<vk::DescriptorPool, GalError> {
        description.pool_sizes(max_sets)?;
        let mut state = self.state();
        state.check_injection()?;
        let pool = vk::DescriptorPool::from_raw(state.next_raw());
        state.pools.insert(
            pool,
            PoolRecord {
                max_sets,
                allocated: 0,
            },
        );
        state.counters.pools_created += 1;
        state.counters.live_pools += 1;
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        if state.pools.remove(&pool).is_some() {
            state.counters.live_pools = state.counters.live_pools.saturating_sub(1);
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>, GalError> {
        let mut state = self.state();
        state.check_injection()?;
        let record = state
            .pools
            .get_mut(&pool)
            .ok_or(GalError::VkError(vk::Result::ERROR_UNKNOWN))?;
        if record
            .allocated
            .checked_add(count)
            .is_none_or(|total| total > record.max_sets)
        {
            return Err(GalError::VkError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        record.allocated += count;
        state.counters.sets_allocated += count;
        Ok((0..count)
            .map(|_| vk::DescriptorSet::from_raw(state.next_raw()))
            .collect())
    }

    fn write_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        _description: &SetLayoutDescription,
        resources: &[ResourceRef],
    ) {
        let mut state = self.state();
        state.counters.descriptor_writes += 1;
        state.contents.insert(set, resources.to_vec());
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
        let mut state = self.state();
        state.counters.binds += 1;
        state.binds.push(RecordedBind {
            cmd,
            bind_point,
            pipeline_layout,
            set_index,
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }
}
