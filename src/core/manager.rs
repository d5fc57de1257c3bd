//! Resource manager: the public allocation API over a single shared ledger.
//!
//! Every mutating call holds the ledger write lock for its whole check-and-commit
//! sequence, which makes each operation atomic and linearizable. `snapshot` and
//! `save` only take the read lock long enough to copy. Encoding, storage writes,
//! logging and audit all happen after the lock is released.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::coordinator::{
    promote_waiting, Promotion, RequestOutcome, WaitOutcome, WaitQueue, WaitingRequest,
};
use crate::core::error::AllocError;
use crate::core::ledger::{Capacity, Ledger, ProcessId, ProcessRecord, ProcessStatus};
use crate::core::persistence::{self, RestoredLedger, StateStore};
use crate::core::resource::ResourceVector;
use crate::util::clock::now_ms;

/// Immutable copy of the allocator state for reporting and monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    /// Ledger contents at snapshot time.
    pub ledger: Ledger,
    /// Queued requests in FIFO order.
    pub waiting: Vec<WaitingRequest>,
    /// Last save sequence number issued.
    pub version: u64,
    /// Snapshot time, milliseconds since epoch.
    pub taken_at_ms: u128,
}

struct AllocatorState {
    ledger: Ledger,
    queue: WaitQueue,
}

/// Deadlock-avoiding allocator shared by all callers.
///
/// Construct one at startup (see [`build_manager`](crate::builders::build_manager))
/// and share it behind an `Arc`.
///
/// ```
/// use resguard::core::{AllocError, Capacity, ResourceManager, ResourceVector};
///
/// let capacity = Capacity::with_default_cap(ResourceVector::new(10, 10, 0, 0));
/// let manager = ResourceManager::new(capacity);
/// manager.register("worker-1", ResourceVector::new(4, 2, 0, 0))?;
/// let outcome = manager.request("worker-1", ResourceVector::new(2, 1, 0, 0))?;
/// assert!(outcome.is_granted());
/// manager.release("worker-1", ResourceVector::new(2, 1, 0, 0))?;
/// # Ok::<(), AllocError>(())
/// ```
pub struct ResourceManager {
    state: RwLock<AllocatorState>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
    /// Save sequence; bumped once per encoded snapshot.
    version: AtomicU64,
    /// Serializes encode+write so stored versions never go backwards.
    persist_lock: Mutex<()>,
}

impl ResourceManager {
    /// Empty allocator over `capacity`.
    pub fn new(capacity: Capacity) -> Self {
        Self::from_ledger(Ledger::new(capacity), 0)
    }

    /// Allocator over an existing ledger, continuing the save sequence at `version`.
    pub fn from_ledger(ledger: Ledger, version: u64) -> Self {
        Self {
            state: RwLock::new(AllocatorState {
                ledger,
                queue: WaitQueue::default(),
            }),
            audit: None,
            version: AtomicU64::new(version),
            persist_lock: Mutex::new(()),
        }
    }

    /// Allocator over a ledger loaded from storage.
    pub fn from_restored(restored: RestoredLedger) -> Self {
        info!(
            version = restored.version,
            processes = restored.ledger.len(),
            "restored ledger from snapshot"
        );
        Self::from_ledger(restored.ledger, restored.version)
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Capacity totals and cap.
    pub fn capacity(&self) -> Capacity {
        *self.state.read().ledger.capacity()
    }

    /// Register `pid` with its declared maximum claim.
    pub fn register(
        &self,
        pid: impl Into<ProcessId>,
        max_claim: ResourceVector,
    ) -> Result<(), AllocError> {
        let pid = pid.into();
        let registered = {
            let mut state = self.state.write();
            let total = state.ledger.capacity().total();
            if let Some(resource) = max_claim.first_exceeding(total) {
                Err(AllocError::InvalidClaim {
                    pid: pid.clone(),
                    resource,
                    claim: max_claim[resource],
                    total: total[resource],
                })
            } else if state.ledger.get(&pid).is_some() {
                Err(AllocError::DuplicateProcess(pid.clone()))
            } else {
                state
                    .ledger
                    .insert(ProcessRecord::new(pid.clone(), max_claim, now_ms()));
                Ok(())
            }
        };

        match &registered {
            Ok(()) => {
                info!(pid = %pid, %max_claim, "process registered");
                self.audit_event(Some(&pid), AuditAction::Register, max_claim, None);
            }
            Err(e) => {
                warn!(pid = %pid, reason = %e, "registration rejected");
                self.audit_event(Some(&pid), AuditAction::Reject, max_claim, Some(e.to_string()));
            }
        }
        registered
    }

    /// Ask for `delta` more units on behalf of `pid`.
    ///
    /// Returns `Granted` if the units were committed, or `Queued` with a ticket if
    /// granting now would leave the ledger unsafe. Queued is not an error.
    pub fn request(&self, pid: &str, delta: ResourceVector) -> Result<RequestOutcome, AllocError> {
        let outcome = match self.request_locked(pid, delta) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(pid, %delta, reason = %e, "request rejected");
                self.audit_event(Some(pid), AuditAction::Reject, delta, Some(e.to_string()));
                return Err(e);
            }
        };

        if outcome.is_granted() {
            info!(pid, %delta, "request granted");
            self.audit_event(Some(pid), AuditAction::Grant, delta, None);
        } else {
            info!(pid, %delta, "request queued, granting now would be unsafe");
            self.audit_event(Some(pid), AuditAction::Queue, delta, None);
        }
        Ok(outcome)
    }

    fn request_locked(
        &self,
        pid: &str,
        delta: ResourceVector,
    ) -> Result<RequestOutcome, AllocError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.ledger.get(pid).is_none() {
            return Err(AllocError::UnknownProcess(pid.to_string()));
        }
        if state.queue.contains(pid) {
            return Err(AllocError::RequestPending(pid.to_string()));
        }

        let now = now_ms();
        if state.ledger.try_grant(pid, delta)? {
            state.ledger.set_status(pid, ProcessStatus::Running, now);
            Ok(RequestOutcome::Granted)
        } else {
            state.ledger.set_status(pid, ProcessStatus::Waiting, now);
            Ok(RequestOutcome::Queued(state.queue.push(pid, delta, now)))
        }
    }

    /// Return `delta` units held by `pid`, then grant queued requests in FIFO order
    /// until one still cannot be granted. Returns the pids granted from the queue.
    pub fn release(&self, pid: &str, delta: ResourceVector) -> Result<Vec<ProcessId>, AllocError> {
        let promotions = match self.release_locked(pid, delta) {
            Ok(promotions) => promotions,
            Err(e) => {
                warn!(pid, %delta, reason = %e, "release rejected");
                self.audit_event(Some(pid), AuditAction::Reject, delta, Some(e.to_string()));
                return Err(e);
            }
        };
        info!(pid, %delta, "resources released");
        self.audit_event(Some(pid), AuditAction::Release, delta, None);
        Ok(self.report_promotions(promotions))
    }

    fn release_locked(
        &self,
        pid: &str,
        delta: ResourceVector,
    ) -> Result<Vec<Promotion>, AllocError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.ledger.release(pid, delta)?;

        let now = now_ms();
        let status = if state.queue.contains(pid) {
            ProcessStatus::Waiting
        } else {
            state
                .ledger
                .get(pid)
                .map_or(ProcessStatus::Registered, ProcessRecord::settled_status)
        };
        state.ledger.set_status(pid, status, now);
        Ok(promote_waiting(&mut state.ledger, &mut state.queue, now))
    }

    /// Withdraw the queued request of `pid`, if any, leaving its allocation as is.
    /// Returns whether a request was withdrawn.
    ///
    /// Withdrawing the head re-evaluates the queue, since the next request may only
    /// have been waiting for its turn.
    pub fn cancel(&self, pid: &str) -> Result<bool, AllocError> {
        let withdrawn = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let settled = state
                .ledger
                .get(pid)
                .ok_or_else(|| AllocError::UnknownProcess(pid.to_string()))?
                .settled_status();
            let was_head = state.queue.is_head(pid);
            state.queue.remove(pid).map(|entry| {
                let now = now_ms();
                state.ledger.set_status(pid, settled, now);
                entry.notify(WaitOutcome::Cancelled);
                let promotions = if was_head {
                    promote_waiting(&mut state.ledger, &mut state.queue, now)
                } else {
                    Vec::new()
                };
                (entry.delta(), promotions)
            })
        };

        let Some((delta, promotions)) = withdrawn else {
            return Ok(false);
        };
        info!(pid, %delta, "queued request cancelled");
        self.audit_event(Some(pid), AuditAction::Cancel, delta, None);
        self.report_promotions(promotions);
        Ok(true)
    }

    /// Remove `pid` for good: withdraw its queued request, return everything it
    /// holds, and re-evaluate the queue. Returns the final record (status Released).
    pub fn deregister(&self, pid: &str) -> Result<ProcessRecord, AllocError> {
        let (record, promotions) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let mut record = state
                .ledger
                .remove(pid)
                .ok_or_else(|| AllocError::UnknownProcess(pid.to_string()))?;
            if let Some(entry) = state.queue.remove(pid) {
                entry.notify(WaitOutcome::Cancelled);
            }
            let now = now_ms();
            record.status = ProcessStatus::Released;
            record.last_updated_ms = now;
            let promotions = promote_waiting(&mut state.ledger, &mut state.queue, now);
            (record, promotions)
        };

        info!(pid, returned = %record.allocation, "process deregistered");
        self.audit_event(Some(pid), AuditAction::Deregister, record.allocation, None);
        self.report_promotions(promotions);
        Ok(record)
    }

    /// Mark `pid` failed: reclaim everything it holds and withdraw its queued request,
    /// keeping the registration. Returns the pids granted from the queue.
    pub fn mark_failed(&self, pid: &str) -> Result<Vec<ProcessId>, AllocError> {
        let (held, promotions) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let held = state
                .ledger
                .get(pid)
                .ok_or_else(|| AllocError::UnknownProcess(pid.to_string()))?
                .allocation;
            if let Some(entry) = state.queue.remove(pid) {
                entry.notify(WaitOutcome::Cancelled);
            }
            state.ledger.release(pid, held)?;
            let now = now_ms();
            state.ledger.set_status(pid, ProcessStatus::Error, now);
            (held, promote_waiting(&mut state.ledger, &mut state.queue, now))
        };

        warn!(pid, reclaimed = %held, "process marked failed");
        self.audit_event(Some(pid), AuditAction::Fail, held, None);
        Ok(self.report_promotions(promotions))
    }

    /// Current status of `pid`.
    pub fn status(&self, pid: &str) -> Option<ProcessStatus> {
        self.state.read().ledger.get(pid).map(|r| r.status)
    }

    /// Copy of the record for `pid`.
    pub fn record(&self, pid: &str) -> Option<ProcessRecord> {
        self.state.read().ledger.get(pid).cloned()
    }

    /// Pids with a queued request, in FIFO order.
    pub fn waiting(&self) -> Vec<ProcessId> {
        self.state
            .read()
            .queue
            .view()
            .into_iter()
            .map(|w| w.pid)
            .collect()
    }

    /// Immutable copy of the full state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read();
        LedgerSnapshot {
            ledger: state.ledger.clone(),
            waiting: state.queue.view(),
            version: self.version.load(Ordering::Acquire),
            taken_at_ms: now_ms(),
        }
    }

    /// Zero every allocation and cancel all queued requests. Registrations survive
    /// with status Registered when `keep_registrations`, otherwise they are dropped.
    pub fn reset(&self, keep_registrations: bool) {
        let withdrawn = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let mut withdrawn = 0_usize;
            for entry in state.queue.drain() {
                entry.notify(WaitOutcome::Cancelled);
                withdrawn += 1;
            }
            state.ledger.clear_allocations(keep_registrations, now_ms());
            withdrawn
        };

        info!(keep_registrations, withdrawn, "ledger reset");
        self.audit_event(
            None,
            AuditAction::Reset,
            ResourceVector::ZERO,
            Some(format!("keep_registrations={keep_registrations}")),
        );
    }

    /// Encode the ledger as a versioned document.
    pub fn save(&self) -> Result<Vec<u8>, AllocError> {
        self.encode().map(|(_, bytes)| bytes)
    }

    /// Save to `store`, returning the version written.
    pub fn persist(&self, store: &dyn StateStore) -> Result<u64, AllocError> {
        let _serial = self.persist_lock.lock();
        let (version, bytes) = self.encode()?;
        store.write(&bytes)?;
        info!(version, bytes = bytes.len(), "ledger persisted");
        Ok(version)
    }

    fn encode(&self) -> Result<(u64, Vec<u8>), AllocError> {
        let (ledger, version) = {
            let state = self.state.read();
            let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
            (state.ledger.clone(), version)
        };
        let bytes = persistence::save(&ledger, version)?;
        Ok((version, bytes))
    }

    fn report_promotions(&self, promotions: Vec<Promotion>) -> Vec<ProcessId> {
        let mut granted = Vec::with_capacity(promotions.len());
        for promotion in promotions {
            match promotion.rejected {
                None => {
                    info!(pid = %promotion.pid, delta = %promotion.delta, "queued request granted");
                    self.audit_event(
                        Some(&promotion.pid),
                        AuditAction::Promote,
                        promotion.delta,
                        None,
                    );
                    granted.push(promotion.pid);
                }
                Some(e) => {
                    warn!(pid = %promotion.pid, reason = %e, "queued request dropped");
                    self.audit_event(
                        Some(&promotion.pid),
                        AuditAction::Reject,
                        promotion.delta,
                        Some(e.to_string()),
                    );
                }
            }
        }
        granted
    }

    fn audit_event(
        &self,
        pid: Option<&str>,
        action: AuditAction,
        resources: ResourceVector,
        detail: Option<String>,
    ) {
        if let Some(audit) = &self.audit {
            audit
                .lock()
                .record(build_audit_event(pid, action, resources, detail));
        }
    }
}
