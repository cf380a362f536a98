pub use binding::{BindingDescription, BindingType};
pub use resource_ref::ResourceRef;
pub use set_layout::{SetLayoutBuilder, SetLayoutDescription, MAX_BINDINGS};

pub mod binding;
pub mod resource_ref;
pub mod set_layout;
