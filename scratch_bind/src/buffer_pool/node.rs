use derivative::Derivative;
use vkgal::ash::vk;
use vkgal::backend::{Backend, HostBuffer, HostBufferCreateInfo};
use vkgal::allocators::MemoryLocation;
use vkgal::GalError;

/// One host visible block sliced into equally sized partitions.
///
/// Partition size and count never change after creation.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ArenaNode<B: Backend> {
    buffer: B::Buffer,
    partition_size: vk::DeviceSize,
    in_use: Vec<bool>,
}

impl<B: Backend> ArenaNode<B> {
    pub fn create(
        backend: &B,
        name: &str,
        usage: vk::BufferUsageFlags,
        partition_size: vk::DeviceSize,
        partition_count: usize,
    ) -> Result<Self, GalError> {
        let size = vk::DeviceSize::try_from(partition_count)
            .ok()
            .and_then(|count| partition_size.checked_mul(count))
            .ok_or(GalError::SizeOverflow)?;
        let buffer = backend.create_host_buffer(&HostBufferCreateInfo {
            name,
            size,
            usage,
            location: MemoryLocation::CpuToGpu,
        })?;
        if buffer.mapped_slice().is_none() {
            return Err(GalError::NoMappedPointer);
        }
        Ok(Self {
            buffer,
            partition_size,
            in_use: vec![false; partition_count],
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    pub fn partition_size(&self) -> vk::DeviceSize {
        self.partition_size
    }

    pub fn partition_count(&self) -> usize {
        self.in_use.len()
    }

    pub fn used_partitions(&self) -> usize {
        self.in_use.iter().filter(|used| **used).count()
    }

    pub fn is_used(&self, partition: usize) -> bool {
        self.in_use.get(partition).copied().unwrap_or(false)
    }

    /// First partition of the first run of `count` contiguous free partitions
    pub fn find_free_run(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.in_use.len() {
            return None;
        }
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for (index, used) in self.in_use.iter().enumerate() {
            if *used {
                run_len = 0;
                run_start = index + 1;
            } else {
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            }
        }
        None
    }

    pub fn mark(&mut self, start: usize, count: usize, used: bool) {
        let end = (start + count).min(self.in_use.len());
        self.in_use[start.min(end)..end].fill(used);
    }

    /// Release every partition
    pub fn clear(&mut self) {
        self.in_use.fill(false);
    }

    /// Mapped bytes `[offset, offset + len)` of the node
    pub fn bytes_mut(
        &mut self,
        offset: vk::DeviceSize,
        len: usize,
    ) -> Result<&mut [u8], GalError> {
        let mapped = self
            .buffer
            .mapped_slice_mut()
            .ok_or(GalError::NoMappedPointer)?;
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .ok_or(GalError::InsufficientSpace)?;
        mapped.get_mut(start..end).ok_or(GalError::InsufficientSpace)
    }

    pub fn bytes(&self, offset: vk::DeviceSize, len: usize) -> Result<&[u8], GalError> {
        let mapped = self
            .buffer
            .mapped_slice()
            .ok_or(GalError::NoMappedPointer)?;
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .ok_or(GalError::InsufficientSpace)?;
        mapped.get(start..end).ok_or(GalError::InsufficientSpace)
    }

    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> Result<(), GalError> {
        self.bytes_mut(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkgal::backend::TestBackend;

    fn node(backend: &TestBackend, count: usize) -> ArenaNode<TestBackend> {
        ArenaNode::create(
            backend,
            "node",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            256,
            count,
        )
        .unwrap()
    }

    #[test]
    fn test_create() {
        let backend = TestBackend::new();
        let node = node(&backend, 4);
        assert_eq!(node.partition_count(), 4);
        assert_eq!(node.used_partitions(), 0);
        assert_eq!(backend.counters().live_buffers, 1);
        drop(node);
        assert_eq!(backend.counters().live_buffers, 0);
    }

    #[test]
    fn test_find_free_run() {
        let backend = TestBackend::new();
        let mut node = node(&backend, 6);
        assert_eq!(node.find_free_run(6), Some(0));
        assert_eq!(node.find_free_run(7), None);
        node.mark(1, 1, true);
        node.mark(4, 1, true);
        // [free, used, free, free, used, free]
        assert_eq!(node.find_free_run(1), Some(0));
        assert_eq!(node.find_free_run(2), Some(2));
        assert_eq!(node.find_free_run(3), None);
        node.mark(1, 1, false);
        assert_eq!(node.find_free_run(4), Some(0));
        node.clear();
        assert_eq!(node.used_partitions(), 0);
    }

    #[test]
    fn test_write_bounds() {
        let backend = TestBackend::new();
        let mut node = node(&backend, 2);
        node.write(256, &[1, 2, 3]).unwrap();
        assert_eq!(node.bytes(256, 3).unwrap(), &[1, 2, 3]);
        assert!(matches!(
            node.write(510, &[0; 4]),
            Err(GalError::InsufficientSpace)
        ));
    }

    #[test]
    fn test_create_failure_propagates() {
        let backend = TestBackend::new();
        backend.fail_after(0);
        let result = ArenaNode::create(
            &backend,
            "node",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            256,
            4,
        );
        assert!(matches!(result, Err(GalError::InjectedFailure)));
    }

    #[test]
    fn test_create_size_overflow() {
        let backend = TestBackend::new();
        let result = ArenaNode::create(
            &backend,
            "node",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            1 << 40,
            1 << 30,
        );
        assert!(matches!(result, Err(GalError::SizeOverflow)));
        assert_eq!(backend.counters().buffers_created, 0);
    }
}
