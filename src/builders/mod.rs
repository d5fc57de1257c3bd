//! Builders to construct the allocator from configuration.

pub mod allocator_builder;
pub mod manager_builder;

pub use allocator_builder::{build_allocator, build_allocator_from_env, Allocator};
pub use manager_builder::build_manager;
