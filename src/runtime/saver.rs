//! Periodic background snapshots of the ledger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::core::{AllocError, ResourceManager, StateStore};
use crate::runtime::Spawn;

/// Handle to a running saver task.
///
/// Dropping the handle stops the task after one final save whose result is lost;
/// call [`SaverHandle::shutdown`] to observe it.
pub struct SaverHandle {
    stop: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<Result<u64, AllocError>>,
}

impl SaverHandle {
    /// Stop the saver and wait for its final save. Returns the version written.
    pub async fn shutdown(mut self) -> Result<u64, AllocError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match (&mut self.done).await {
            Ok(result) => result,
            Err(_) => Err(AllocError::Storage("saver task ended without a final save".into())),
        }
    }
}

/// Start saving `manager` to `store` every `interval`.
///
/// Encoding and the storage write run on the blocking pool. A failed periodic save
/// is logged and retried on the next tick. A zero `interval` is rejected with
/// [`AllocError::InvalidConfig`].
pub fn spawn_periodic_saver<S: Spawn>(
    manager: Arc<ResourceManager>,
    store: Arc<dyn StateStore>,
    interval: Duration,
    spawner: &S,
) -> Result<SaverHandle, AllocError> {
    if interval.is_zero() {
        return Err(AllocError::InvalidConfig(
            "save interval must be greater than zero".into(),
        ));
    }
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    spawner.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    match persist_blocking(&manager, &store).await {
                        Ok(version) => debug!(version, "periodic save complete"),
                        Err(e) => warn!(error = %e, "periodic save failed"),
                    }
                }
            }
        }

        let result = persist_blocking(&manager, &store).await;
        if let Err(e) = &result {
            warn!(error = %e, "final save failed");
        }
        let _ = done_tx.send(result);
    });

    Ok(SaverHandle {
        stop: Some(stop_tx),
        done: done_rx,
    })
}

async fn persist_blocking(
    manager: &Arc<ResourceManager>,
    store: &Arc<dyn StateStore>,
) -> Result<u64, AllocError> {
    let manager = Arc::clone(manager);
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || manager.persist(store.as_ref()))
        .await
        .map_err(|e| AllocError::Storage(e.to_string()))?
}
