//! Infrastructure adapters for snapshot storage.

pub mod store;

pub use store::{FileStateStore, InMemoryStateStore};
