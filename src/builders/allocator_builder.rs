//! One-call startup for applications embedding the allocator.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;

use crate::builders::build_manager;
use crate::config::AllocatorConfig;
use crate::core::{AppResult, AuditSink, InMemoryAuditSink, ResourceManager};
use crate::infra::FileStateStore;

/// Everything an application needs to run the allocator.
pub struct Allocator {
    /// Configuration the allocator was built from.
    pub config: AllocatorConfig,
    /// The shared manager.
    pub manager: Arc<ResourceManager>,
    /// Snapshot file at `config.state_path`.
    pub store: Arc<FileStateStore>,
    /// Audit history, bounded by `config.max_history`.
    pub audit: Arc<Mutex<InMemoryAuditSink>>,
}

/// Build the allocator from `config`: open the state file, apply the startup policy
/// and attach an in-memory audit history.
pub fn build_allocator(config: AllocatorConfig) -> AppResult<Allocator> {
    let store = FileStateStore::new(&config.state_path).with_context(|| {
        format!("opening state store at {}", config.state_path.display())
    })?;
    let audit = Arc::new(Mutex::new(InMemoryAuditSink::new(config.max_history)));
    let sink: Box<dyn AuditSink> = Box::new(Arc::clone(&audit));
    let manager =
        build_manager(&config, &store, Some(sink)).context("building resource manager")?;

    Ok(Allocator {
        config,
        manager: Arc::new(manager),
        store: Arc::new(store),
        audit,
    })
}

/// [`build_allocator`] with configuration read from the environment and `.env`.
pub fn build_allocator_from_env() -> AppResult<Allocator> {
    let config = AllocatorConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("loading allocator configuration")?;
    build_allocator(config)
}
