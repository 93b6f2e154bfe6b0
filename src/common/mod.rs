//! Low-level utilities shared across the crate.

pub mod linalg;
pub mod variables;

pub use variables::{Scope, VariableAllocator, VariableId, VariablePool};
