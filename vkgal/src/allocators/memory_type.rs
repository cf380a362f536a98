#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Memory useful in device accessible memory
    GpuOnly,
    /// Memory useful for uploading data to the device
    #[default]
    CpuToGpu,
    /// Memory useful for read back of data
    GpuToCpu,
}

impl MemoryLocation {
    /// Whether the CPU can write into memory placed here
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }
}

#[cfg(feature = "gpu-allocator")]
impl From<MemoryLocation> for gpu_allocator::MemoryLocation {
    fn from(value: MemoryLocation) -> Self {
        match value {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}
