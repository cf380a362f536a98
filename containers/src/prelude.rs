pub use super::chain::Chain;
pub use super::error;
pub use super::error::ContainerErrors;
pub use super::intern_table::InternTable;
