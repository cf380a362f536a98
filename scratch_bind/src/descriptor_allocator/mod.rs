//! Content addressed descriptor sets.
//!
//! A [`DescriptorSetAllocator`] serves a single layout from a chain of [`RingNode`]s. Asking for
//! contents that a set already holds returns that set without touching the GPU, as long as the set
//! is free or was claimed in the current frame slot. Otherwise the first free set is rewritten.
//! Sets are freed only when the frame slot they were claimed in comes around again.

use derivative::Derivative;
use scratch_containers::prelude::Chain;
use tracing::{debug, trace, warn};
use vkgal::ash::vk;
use vkgal::backend::Backend;
use vkgal::descriptor::{ResourceRef, SetLayoutDescription};
use vkgal::traits::Destructible;

use crate::error::ScratchError;

pub use slot::{hash_refs, BindingSlot, RingNode};

pub mod slot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorAllocatorCreateInfo {
    pub frames_in_flight: usize,
    /// Sets per ring node
    pub ring_size: u32,
    /// `None` grows without bound
    pub max_nodes: Option<usize>,
    pub name: String,
}

impl Default for DescriptorAllocatorCreateInfo {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            ring_size: 64,
            max_nodes: None,
            name: String::from("descriptor sets"),
        }
    }
}

impl DescriptorAllocatorCreateInfo {
    pub fn frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn ring_size(mut self, ring_size: u32) -> Self {
        self.ring_size = ring_size;
        self
    }

    pub fn max_nodes(mut self, max_nodes: Option<usize>) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ScratchError> {
        if self.frames_in_flight == 0 {
            return Err(ScratchError::InvalidConfig("frames_in_flight must be at least 1"));
        }
        if self.ring_size == 0 {
            return Err(ScratchError::InvalidConfig("ring_size must be at least 1"));
        }
        if self.max_nodes == Some(0) {
            return Err(ScratchError::InvalidConfig("max_nodes must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DescriptorAllocatorStats {
    pub nodes: usize,
    pub slots: usize,
    pub slots_in_use: usize,
    pub allocations: u64,
    /// Allocations answered without a descriptor write
    pub reuse_hits: u64,
    pub claims: u64,
    pub descriptor_writes: u64,
    pub growth_events: u64,
    pub frames_begun: u64,
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct DescriptorSetAllocator<B: Backend> {
    #[derivative(Debug = "ignore")]
    backend: B,
    name: String,
    description: SetLayoutDescription,
    layout: vk::DescriptorSetLayout,
    nodes: Chain<RingNode<B>>,
    ring_size: u32,
    frames_in_flight: usize,
    current: usize,
    stats: DescriptorAllocatorStats,
}

impl<B: Backend> DescriptorSetAllocator<B> {
    pub fn new(
        backend: B,
        description: SetLayoutDescription,
        create_info: &DescriptorAllocatorCreateInfo,
    ) -> Result<Self, ScratchError> {
        create_info.validate()?;
        let layout = backend.create_descriptor_set_layout(&description)?;
        let nodes = match create_info.max_nodes {
            Some(max) => Chain::with_max(max),
            None => Chain::new(),
        };
        // Drop destroys the layout if the first ring fails
        let mut allocator = Self {
            backend,
            name: create_info.name.clone(),
            description,
            layout,
            nodes,
            ring_size: create_info.ring_size,
            frames_in_flight: create_info.frames_in_flight,
            current: 0,
            stats: DescriptorAllocatorStats::default(),
        };
        allocator.grow()?;
        allocator.stats.growth_events = 0;
        Ok(allocator)
    }

    pub fn description(&self) -> &SetLayoutDescription {
        &self.description
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    fn grow(&mut self) -> Result<usize, ScratchError> {
        if self.nodes.is_full() {
            let max_nodes = self.nodes.max().unwrap_or(self.nodes.len());
            warn!("{}: out of ring nodes ({})", self.name, max_nodes);
            return Err(ScratchError::DescriptorAllocatorExhausted { max_nodes });
        }
        let node = RingNode::new(
            self.backend.clone(),
            &self.description,
            self.layout,
            self.ring_size,
        )?;
        let index = self.nodes.push(node)?;
        self.stats.growth_events += 1;
        debug!(
            "{}: added ring node {} ({} sets)",
            self.name, index, self.ring_size
        );
        Ok(index)
    }

    /// A set holding exactly `refs`, valid until this frame slot is recycled.
    ///
    /// `refs` are laid out binding-major and must match the layout.
    pub fn alloc(&mut self, refs: &[ResourceRef]) -> Result<vk::DescriptorSet, ScratchError> {
        self.description.check(refs)?;
        let hash = hash_refs(refs);
        let frame = self.current;
        self.stats.allocations += 1;

        // An exact match anywhere wins over a free set earlier in the chain
        if let Some(set) = self
            .nodes
            .iter_mut()
            .find_map(|node| node.reuse(frame, hash, refs))
        {
            self.stats.reuse_hits += 1;
            trace!("{}: reused {:?}", self.name, set);
            return Ok(set);
        }

        let description = &self.description;
        let claimed = self
            .nodes
            .iter_mut()
            .find_map(|node| node.claim(description, frame, hash, refs));
        let set = match claimed {
            Some(set) => set,
            None => {
                let index = self.grow()?;
                let description = &self.description;
                self.nodes
                    .try_get_mut(index)?
                    .claim(description, frame, hash, refs)
                    .ok_or(ScratchError::DescriptorAllocatorExhausted {
                        max_nodes: self.nodes.len(),
                    })?
            }
        };
        self.stats.claims += 1;
        self.stats.descriptor_writes += 1;
        trace!("{}: wrote {:?}", self.name, set);
        Ok(set)
    }

    /// Advance the frame slot and free every set claimed the last time this slot was current.
    ///
    /// The caller must have confirmed the GPU finished the frame that last used that slot.
    pub fn begin_frame(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
        let frame = self.current;
        let released: usize = self
            .nodes
            .iter_mut()
            .flat_map(|node| node.slots_mut().iter_mut())
            .map(|slot| slot.release_if(frame) as usize)
            .sum();
        self.stats.frames_begun += 1;
        trace!(
            "{}: slot {} current, released {} sets",
            self.name,
            self.current,
            released
        );
    }

    /// Forget the snapshot of every set that references a resource matching `predicate`.
    ///
    /// Call before destroying a resource so a later resource reusing its handle value is never
    /// mistaken for it. Returns the number of snapshots dropped.
    pub fn invalidate<F: Fn(&ResourceRef) -> bool>(&mut self, predicate: F) -> usize {
        let mut forgotten = 0;
        for slot in self
            .nodes
            .iter_mut()
            .flat_map(|node| node.slots_mut().iter_mut())
        {
            if slot
                .cached()
                .is_some_and(|refs| refs.iter().any(&predicate))
            {
                slot.forget();
                forgotten += 1;
            }
        }
        if forgotten > 0 {
            debug!("{}: invalidated {} sets", self.name, forgotten);
        }
        forgotten
    }

    pub fn stats(&self) -> DescriptorAllocatorStats {
        let mut stats = self.stats;
        stats.nodes = self.nodes.len();
        stats.slots = self.nodes.iter().map(|node| node.slots().len()).sum();
        stats.slots_in_use = self
            .nodes
            .iter()
            .flat_map(|node| node.slots().iter())
            .filter(|slot| slot.in_use())
            .count();
        stats
    }

    pub fn slots(&self) -> impl Iterator<Item = &BindingSlot> {
        self.nodes.iter().flat_map(|node| node.slots().iter())
    }
}

impl<B: Backend> Drop for DescriptorSetAllocator<B> {
    fn drop(&mut self) {
        // Pools before the layout their sets were allocated with
        self.nodes.iter_mut().for_each(|node| node.destroy());
        self.backend.destroy_descriptor_set_layout(self.layout);
    }
}
