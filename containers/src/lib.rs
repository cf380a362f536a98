pub mod chain;
pub mod error;
pub mod intern_table;
pub mod prelude;
