//! Runtime adapters and the reporting surface.

use std::future::Future;

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod saver;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_spawner;

pub use api::{
    health, utilization_report, Health, RequestDisposition, RequestResponse, ResourceUsage,
    UtilizationReport,
};
#[cfg(feature = "tokio-runtime")]
pub use saver::{spawn_periodic_saver, SaverHandle};
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioSpawner;

/// Abstracts task spawning so background work is not tied to one runtime.
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
