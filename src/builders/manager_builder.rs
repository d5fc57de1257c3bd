//! Builds the resource manager from configuration, applying the startup policy.

use tracing::{info, warn};

use crate::config::{AllocatorConfig, StartupPolicy};
use crate::core::persistence;
use crate::core::{AllocError, AuditSink, Capacity, ResourceManager, StateStore};

/// Build the single allocator instance for this process.
///
/// Must run before any `register` or `request` is accepted. Under
/// [`StartupPolicy::Restore`] and [`StartupPolicy::ResetAllocations`] the last
/// snapshot in `store` is loaded; a snapshot that fails validation, or whose capacity
/// differs from the configured one, is discarded with a warning and the allocator
/// starts from a clean slate. Storage read errors are returned.
pub fn build_manager(
    cfg: &AllocatorConfig,
    store: &dyn StateStore,
    audit: Option<Box<dyn AuditSink>>,
) -> Result<ResourceManager, AllocError> {
    cfg.validate().map_err(AllocError::InvalidConfig)?;
    let capacity = cfg.capacity()?;

    let manager = match cfg.startup {
        StartupPolicy::ResetAll => {
            info!("starting with an empty ledger");
            ResourceManager::new(capacity)
        }
        StartupPolicy::Restore => restore_or_fresh(capacity, store)?,
        StartupPolicy::ResetAllocations => {
            let manager = restore_or_fresh(capacity, store)?;
            manager.reset(true);
            manager
        }
    };

    Ok(match audit {
        Some(sink) => manager.with_audit(sink),
        None => manager,
    })
}

fn restore_or_fresh(
    capacity: Capacity,
    store: &dyn StateStore,
) -> Result<ResourceManager, AllocError> {
    let Some(bytes) = store.read()? else {
        info!("no snapshot found, starting with an empty ledger");
        return Ok(ResourceManager::new(capacity));
    };

    match persistence::load(&bytes) {
        Ok(restored) if *restored.ledger.capacity() == capacity => {
            Ok(ResourceManager::from_restored(restored))
        }
        Ok(restored) => {
            warn!(
                saved = %restored.ledger.capacity().total(),
                configured = %capacity.total(),
                "snapshot capacity differs from configuration, starting clean"
            );
            Ok(ResourceManager::new(capacity))
        }
        Err(e) => {
            warn!(error = %e, "discarding unreadable snapshot, starting clean");
            Ok(ResourceManager::new(capacity))
        }
    }
}
