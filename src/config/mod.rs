//! Configuration models for capacity, caps, persistence and startup.

pub mod allocator;

pub use allocator::{AllocatorConfig, StartupPolicy};
