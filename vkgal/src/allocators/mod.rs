/// Memory placement shared by every backend
pub mod memory_type;

pub use memory_type::*;
