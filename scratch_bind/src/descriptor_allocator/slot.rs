use std::hash::{Hash, Hasher};

use derivative::Derivative;
use vkgal::ash::vk;
use vkgal::backend::Backend;
use vkgal::descriptor::{ResourceRef, SetLayoutDescription};
use vkgal::traits::Destructible;
use vkgal::GalError;

/// Hash of a resource reference array, compared before the arrays themselves
pub fn hash_refs(refs: &[ResourceRef]) -> u64 {
    let mut hasher = std::hash::DefaultHasher::new();
    refs.hash(&mut hasher);
    hasher.finish()
}

/// A descriptor set plus a snapshot of what was last written into it
#[derive(Debug, Clone)]
pub struct BindingSlot {
    handle: vk::DescriptorSet,
    // (hash, contents) of the last write
    cached: Option<(u64, Vec<ResourceRef>)>,
    in_use: bool,
    /// Frame slot the set was last claimed in
    frame: usize,
}

impl BindingSlot {
    pub fn new(handle: vk::DescriptorSet) -> Self {
        Self {
            handle,
            cached: None,
            in_use: false,
            frame: 0,
        }
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn cached(&self) -> Option<&[ResourceRef]> {
        self.cached.as_ref().map(|(_, refs)| refs.as_slice())
    }

    /// Whether the set already holds exactly `refs`
    pub fn matches(&self, hash: u64, refs: &[ResourceRef]) -> bool {
        match &self.cached {
            Some((cached_hash, cached)) => *cached_hash == hash && cached.as_slice() == refs,
            None => false,
        }
    }

    /// Sets claimed in another frame slot may still be read by the GPU
    pub fn reusable_in(&self, frame: usize) -> bool {
        !self.in_use || self.frame == frame
    }

    pub fn claim(&mut self, frame: usize) {
        self.in_use = true;
        self.frame = frame;
    }

    /// Record that `refs` were written into the set
    pub fn store(&mut self, hash: u64, refs: &[ResourceRef]) {
        match &mut self.cached {
            Some((cached_hash, cached)) => {
                *cached_hash = hash;
                cached.clear();
                cached.extend_from_slice(refs);
            }
            None => self.cached = Some((hash, refs.to_vec())),
        }
    }

    /// Free the slot if it was claimed in `frame`. The snapshot is kept.
    pub fn release_if(&mut self, frame: usize) -> bool {
        if self.in_use && self.frame == frame {
            self.in_use = false;
            true
        } else {
            false
        }
    }

    /// Drop the snapshot so the set is rewritten on its next claim
    pub fn forget(&mut self) {
        self.cached = None;
    }
}

/// A descriptor pool with every set it can hold allocated up front
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct RingNode<B: Backend> {
    #[derivative(Debug = "ignore")]
    backend: B,
    pool: vk::DescriptorPool,
    slots: Vec<BindingSlot>,
}

impl<B: Backend> RingNode<B> {
    pub fn new(
        backend: B,
        description: &SetLayoutDescription,
        layout: vk::DescriptorSetLayout,
        ring_size: u32,
    ) -> Result<Self, GalError> {
        let pool = backend.create_descriptor_pool(description, ring_size)?;
        // Own the pool before allocating so a failure below still destroys it
        let mut node = Self {
            backend,
            pool,
            slots: Vec::with_capacity(ring_size as usize),
        };
        let sets = node
            .backend
            .allocate_descriptor_sets(node.pool, layout, ring_size)?;
        node.slots.extend(sets.into_iter().map(BindingSlot::new));
        Ok(node)
    }

    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [BindingSlot] {
        &mut self.slots
    }

    /// Set that already holds `refs` and is either free or claimed during `frame`
    pub fn reuse(
        &mut self,
        frame: usize,
        hash: u64,
        refs: &[ResourceRef],
    ) -> Option<vk::DescriptorSet> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.reusable_in(frame) && slot.matches(hash, refs))?;
        slot.claim(frame);
        Some(slot.handle)
    }

    /// Write `refs` into the first free set
    pub fn claim(
        &mut self,
        description: &SetLayoutDescription,
        frame: usize,
        hash: u64,
        refs: &[ResourceRef],
    ) -> Option<vk::DescriptorSet> {
        let slot = self.slots.iter_mut().find(|slot| !slot.in_use)?;
        self.backend
            .write_descriptor_set(slot.handle, description, refs);
        slot.store(hash, refs);
        slot.claim(frame);
        Some(slot.handle)
    }
}

impl<B: Backend> Destructible for RingNode<B> {
    fn destroy(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            // Sets are freed with their pool
            self.backend.destroy_descriptor_pool(self.pool);
            self.pool = vk::DescriptorPool::null();
            self.slots.clear();
        }
    }
}

impl<B: Backend> Drop for RingNode<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}
