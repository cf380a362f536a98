use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum ContainerErrors {
    #[error("Container is at its capacity of {capacity} entries")]
    CapacityExceeded { capacity: usize },

    #[error("Chain already holds its maximum of {max} nodes")]
    ChainFull { max: usize },

    #[error("Expected a valid index, got {index}")]
    InvalidHandle { index: usize },
}
