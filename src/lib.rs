//! # ResGuard
//!
//! A deadlock-avoiding allocator for a fixed pool of CPU, memory, disk and network
//! units shared by concurrently running processes.
//!
//! Every process declares its maximum claim up front. A request is only committed if
//! the ledger stays in a *safe state*: some order exists in which every registered
//! process can obtain its remaining need and finish. Requests that would break safety
//! are parked in a FIFO wait queue and granted automatically when later releases make
//! them safe. On top of that, no resource type may ever be more than a configurable
//! fraction (90% by default) allocated.
//!
//! ## Key Features
//!
//! - **Banker's Safety Check**: deterministic, pid-ordered safe-sequence search
//! - **Utilization Cap**: per-resource headroom enforced on every grant
//! - **FIFO Wait Queue**: unsafe requests block on a [`GrantTicket`](core::GrantTicket)
//! - **Persistence**: versioned JSON snapshots, validated on restore
//! - **Audit Trail**: bounded history of every ledger mutation
//!
//! ```
//! use resguard::core::{Capacity, ResourceManager, ResourceVector};
//!
//! let capacity = Capacity::with_default_cap(ResourceVector::new(8, 64, 0, 0));
//! let manager = ResourceManager::new(capacity);
//! manager.register("job-a", ResourceVector::new(4, 32, 0, 0)).unwrap();
//! assert!(manager.request("job-a", ResourceVector::new(2, 16, 0, 0)).unwrap().is_granted());
//! ```
//!
//! Startup from configuration goes through [`builders::build_manager`]; background
//! snapshots through [`runtime::spawn_periodic_saver`] (with the default
//! `tokio-runtime` feature).

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core allocation model: resources, ledger, safety, wait queue and manager.
pub mod core;
/// Configuration models and environment loading.
pub mod config;
/// Builders to construct the manager from configuration.
pub mod builders;
/// Infrastructure adapters for snapshot storage.
pub mod infra;
/// Runtime adapters, background saving and the reporting surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
