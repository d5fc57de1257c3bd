//! Snapshot storage backends.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
