/// Utility functions commonly used
pub mod align;
pub use align::*;
