//! Transient uniform memory.
//!
//! Every frame in flight owns its own chain of [`ArenaNode`]s. Allocations are only made from the
//! chain of the current frame slot and are reclaimed in bulk when [`BufferPool::begin_frame`]
//! cycles back around to that slot.

use derivative::Derivative;
use scratch_containers::prelude::Chain;
use tracing::{debug, trace, warn};
use vkgal::ash::vk;
use vkgal::backend::Backend;
use vkgal::descriptor::ResourceRef;
use vkgal::util::{checked_align, div_ceil};

use crate::error::ScratchError;

pub use node::ArenaNode;

pub mod node;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolCreateInfo {
    pub frames_in_flight: usize,
    /// Rounded up to the device's offset alignment for `usage`
    pub partition_size: vk::DeviceSize,
    pub partitions_per_node: usize,
    /// Per frame slot limit of nodes. `None` grows without bound.
    pub max_nodes: Option<usize>,
    pub usage: vk::BufferUsageFlags,
    pub name: String,
}

impl Default for BufferPoolCreateInfo {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            partition_size: 256,
            partitions_per_node: 64,
            max_nodes: None,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            name: String::from("uniform scratch"),
        }
    }
}

impl BufferPoolCreateInfo {
    pub fn frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn partition_size(mut self, partition_size: vk::DeviceSize) -> Self {
        self.partition_size = partition_size;
        self
    }

    pub fn partitions_per_node(mut self, partitions_per_node: usize) -> Self {
        self.partitions_per_node = partitions_per_node;
        self
    }

    pub fn max_nodes(mut self, max_nodes: Option<usize>) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
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
        if self.partition_size == 0 {
            return Err(ScratchError::InvalidConfig("partition_size must be at least 1"));
        }
        if self.partitions_per_node == 0 {
            return Err(ScratchError::InvalidConfig(
                "partitions_per_node must be at least 1",
            ));
        }
        if self.max_nodes == Some(0) {
            return Err(ScratchError::InvalidConfig("max_nodes must be at least 1"));
        }
        node_bytes(self.partition_size, self.partitions_per_node)?;
        Ok(())
    }

    /// Partition size once rounded up to `alignment`, and the byte size of one node
    pub fn node_size(
        &self,
        alignment: vk::DeviceSize,
    ) -> Result<(vk::DeviceSize, vk::DeviceSize), ScratchError> {
        self.validate()?;
        let partition_size = checked_align(self.partition_size, alignment).ok_or(
            ScratchError::InvalidConfig("partition_size overflows once aligned"),
        )?;
        let capacity = node_bytes(partition_size, self.partitions_per_node)?;
        Ok((partition_size, capacity))
    }
}

fn node_bytes(
    partition_size: vk::DeviceSize,
    partitions_per_node: usize,
) -> Result<vk::DeviceSize, ScratchError> {
    vk::DeviceSize::try_from(partitions_per_node)
        .ok()
        .and_then(|count| partition_size.checked_mul(count))
        // the node is mapped as one host slice
        .filter(|bytes| usize::try_from(*bytes).is_ok())
        .ok_or(ScratchError::InvalidConfig(
            "partition_size * partitions_per_node does not fit in memory",
        ))
}

/// A region of uniform memory valid until the frame slot it came from is recycled
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UniformAllocation {
    pub buffer: vk::Buffer,
    /// Byte offset into `buffer`, always a multiple of the partition size
    pub offset: vk::DeviceSize,
    /// Bytes requested
    pub size: vk::DeviceSize,
    /// Bytes reserved, a whole number of partitions
    pub reserved: vk::DeviceSize,
    /// Frame number the allocation was made in
    pub frame: u64,
    slot: usize,
    node: usize,
}

impl UniformAllocation {
    /// Reference to the allocated range. Zero sized allocations reference their whole reservation.
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::buffer(self.buffer, self.offset, self.range())
    }

    pub fn range(&self) -> vk::DeviceSize {
        if self.size == 0 {
            self.reserved
        } else {
            self.size
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Nodes across every frame slot
    pub nodes: usize,
    pub partitions_in_use: usize,
    pub allocations: u64,
    pub growth_events: u64,
    pub frames_begun: u64,
}

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct BufferPool<B: Backend> {
    #[derivative(Debug = "ignore")]
    backend: B,
    name: String,
    chains: Vec<Chain<ArenaNode<B>>>,
    usage: vk::BufferUsageFlags,
    partition_size: vk::DeviceSize,
    partitions_per_node: usize,
    node_capacity: vk::DeviceSize,
    max_nodes: Option<usize>,
    /// Index of the chain allocations are made from
    current: usize,
    frame: u64,
    stats: BufferPoolStats,
}

impl<B: Backend> BufferPool<B> {
    pub fn new(backend: B, create_info: BufferPoolCreateInfo) -> Result<Self, ScratchError> {
        let alignment = backend.limits().offset_alignment(create_info.usage);
        let (partition_size, node_capacity) = create_info.node_size(alignment)?;
        if partition_size != create_info.partition_size {
            debug!(
                "{}: partition size {} rounded up to {} for alignment {}",
                create_info.name, create_info.partition_size, partition_size, alignment
            );
        }

        let mut pool = Self {
            backend,
            name: create_info.name,
            chains: Vec::with_capacity(create_info.frames_in_flight),
            usage: create_info.usage,
            partition_size,
            partitions_per_node: create_info.partitions_per_node,
            node_capacity,
            max_nodes: create_info.max_nodes,
            current: 0,
            frame: 0,
            stats: BufferPoolStats::default(),
        };
        for slot in 0..create_info.frames_in_flight {
            let mut chain = match pool.max_nodes {
                Some(max) => Chain::with_max(max),
                None => Chain::new(),
            };
            chain.push(pool.create_node(slot, 0)?)?;
            pool.chains.push(chain);
        }
        Ok(pool)
    }

    fn create_node(&self, slot: usize, index: usize) -> Result<ArenaNode<B>, ScratchError> {
        let name = format!("{} (frame slot {}, node {})", self.name, slot, index);
        let node = ArenaNode::create(
            &self.backend,
            &name,
            self.usage,
            self.partition_size,
            self.partitions_per_node,
        )?;
        debug!(
            "{}: created node {} for frame slot {} ({} bytes)",
            self.name,
            index,
            slot,
            self.node_capacity()
        );
        Ok(node)
    }

    pub fn partition_size(&self) -> vk::DeviceSize {
        self.partition_size
    }

    /// Largest request a single node can satisfy
    pub fn node_capacity(&self) -> vk::DeviceSize {
        self.node_capacity
    }

    pub fn frames_in_flight(&self) -> usize {
        self.chains.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Number of frames begun since creation
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Reserve `size` bytes from the current frame slot, growing its chain if no node has room
    pub fn alloc(&mut self, size: vk::DeviceSize) -> Result<UniformAllocation, ScratchError> {
        if size > self.node_capacity() {
            return Err(ScratchError::AllocationTooLarge {
                requested: size,
                capacity: self.node_capacity(),
            });
        }
        // Zero sized requests still take a partition so every allocation has a distinct offset
        let required = div_ceil(size, self.partition_size).max(1) as usize;

        let chain = &mut self.chains[self.current];
        let found = chain
            .iter()
            .enumerate()
            .find_map(|(index, node)| node.find_free_run(required).map(|start| (index, start)));
        let (node_index, start) = match found {
            Some(found) => found,
            None => {
                if chain.is_full() {
                    let max_nodes = chain.max().unwrap_or(chain.len());
                    warn!(
                        "{}: frame slot {} is out of nodes ({})",
                        self.name, self.current, max_nodes
                    );
                    return Err(ScratchError::PoolExhausted { max_nodes });
                }
                let node = self.create_node(self.current, self.chains[self.current].len())?;
                let index = self.chains[self.current].push(node)?;
                self.stats.growth_events += 1;
                (index, 0)
            }
        };

        let node = self.chains[self.current].try_get_mut(node_index)?;
        node.mark(start, required, true);
        let allocation = UniformAllocation {
            buffer: node.handle(),
            offset: start as vk::DeviceSize * self.partition_size,
            size,
            reserved: required as vk::DeviceSize * self.partition_size,
            frame: self.frame,
            slot: self.current,
            node: node_index,
        };
        self.stats.allocations += 1;
        #[cfg(feature = "log-memory-allocations")]
        trace!(
            "{}: {} bytes at node {} offset {} (frame {})",
            self.name,
            size,
            node_index,
            allocation.offset,
            self.frame
        );
        Ok(allocation)
    }

    fn node_for(&mut self, allocation: &UniformAllocation) -> Result<&mut ArenaNode<B>, ScratchError> {
        if allocation.frame != self.frame {
            return Err(ScratchError::StaleAllocation {
                allocated: allocation.frame,
                current: self.frame,
            });
        }
        Ok(self.chains[allocation.slot].try_get_mut(allocation.node)?)
    }

    /// Mapped bytes of `allocation`
    pub fn host_slice_mut(
        &mut self,
        allocation: &UniformAllocation,
    ) -> Result<&mut [u8], ScratchError> {
        let node = self.node_for(allocation)?;
        Ok(node.bytes_mut(allocation.offset, allocation.size as usize)?)
    }

    /// Copy `data` to the start of `allocation`
    pub fn write(&mut self, allocation: &UniformAllocation, data: &[u8]) -> Result<(), ScratchError> {
        if data.len() as vk::DeviceSize > allocation.size {
            return Err(vkgal::GalError::InsufficientSpace.into());
        }
        let node = self.node_for(allocation)?;
        node.write(allocation.offset, data)?;
        Ok(())
    }

    /// Allocate and fill in one step
    pub fn push<T: bytemuck::Pod>(&mut self, value: &T) -> Result<UniformAllocation, ScratchError> {
        self.push_bytes(bytemuck::bytes_of(value))
    }

    pub fn push_slice<T: bytemuck::Pod>(
        &mut self,
        values: &[T],
    ) -> Result<UniformAllocation, ScratchError> {
        self.push_bytes(bytemuck::cast_slice(values))
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Result<UniformAllocation, ScratchError> {
        let allocation = self.alloc(data.len() as vk::DeviceSize)?;
        self.write(&allocation, data)?;
        Ok(allocation)
    }

    /// Advance to the next frame slot and release everything it held.
    ///
    /// The caller must have confirmed the GPU finished the frame that last used that slot.
    pub fn begin_frame(&mut self) {
        self.current = (self.current + 1) % self.chains.len();
        self.frame += 1;
        self.chains[self.current]
            .iter_mut()
            .for_each(|node| node.clear());
        self.stats.frames_begun += 1;
        trace!(
            "{}: frame {} uses slot {}",
            self.name,
            self.frame,
            self.current
        );
    }

    pub fn stats(&self) -> BufferPoolStats {
        let mut stats = self.stats;
        stats.nodes = self.chains.iter().map(|chain| chain.len()).sum();
        stats.partitions_in_use = self
            .chains
            .iter()
            .flat_map(|chain| chain.iter())
            .map(|node| node.used_partitions())
            .sum();
        stats
    }

    /// Nodes in the chain of `slot`
    pub fn nodes_in_slot(&self, slot: usize) -> usize {
        self.chains.get(slot).map_or(0, |chain| chain.len())
    }
}
