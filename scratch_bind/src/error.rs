use scratch_containers::prelude::ContainerErrors;
use thiserror::Error;
use vkgal::GalError;

#[derive(Debug, Error)]
pub enum ScratchError {
    #[error(transparent)]
    Gal(#[from] GalError),

    #[error(transparent)]
    Container(#[from] ContainerErrors),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("Requested {requested} bytes, a single node holds at most {capacity}")]
    AllocationTooLarge { requested: u64, capacity: u64 },

    #[error("Buffer pool reached its limit of {max_nodes} nodes for this frame")]
    PoolExhausted { max_nodes: usize },

    #[error("Descriptor set allocator reached its limit of {max_nodes} ring nodes")]
    DescriptorAllocatorExhausted { max_nodes: usize },

    #[error("Layout registry is full ({capacity} layouts)")]
    RegistryFull { capacity: usize },

    #[error("No layout is registered under handle {0}")]
    InvalidLayoutHandle(u16),

    #[error("Allocation from frame {allocated} used during frame {current}")]
    StaleAllocation { allocated: u64, current: u64 },

    #[error("Frame {frame} still owns frame slot {slot} and has not been retired")]
    FrameInFlight { frame: u64, slot: usize },

    #[error("Cannot retire frame {frame} while frame {current} is being recorded")]
    RetireFromFuture { frame: u64, current: u64 },

    #[error("Dynamic offset {offset} does not fit in 32 bits")]
    DynamicOffsetOutOfRange { offset: u64 },
}
