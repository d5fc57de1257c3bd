//! Audit trail of ledger mutations.
//!
//! The manager emits one event per mutation after releasing the ledger lock.
//! Sinks are bounded so that a long-running allocator keeps only recent history.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::ledger::ProcessId;
use crate::core::resource::ResourceVector;
use crate::util::clock::now_ms;

/// Kind of mutation recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Process registered with its max claim.
    Register,
    /// Request granted immediately.
    Grant,
    /// Request parked in the wait queue.
    Queue,
    /// Queued request granted on re-evaluation.
    Promote,
    /// Request, release or registration refused.
    Reject,
    /// Units returned.
    Release,
    /// Queued request withdrawn.
    Cancel,
    /// Process removed from the ledger.
    Deregister,
    /// Process marked failed.
    Fail,
    /// All allocations zeroed.
    Reset,
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related process, absent for ledger-wide events.
    pub pid: Option<ProcessId>,
    /// Action taken.
    pub action: AuditAction,
    /// Units involved (claim, request or release delta).
    pub resources: ResourceVector,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context, such as a rejection reason.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory audit sink.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// A shared sink lets the caller keep a handle for reading history back.
impl<S: AuditSink> AuditSink for Arc<Mutex<S>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// Helper to build an audit event stamped with a fresh id and the current time.
pub fn build_audit_event(
    pid: Option<&str>,
    action: AuditAction,
    resources: ResourceVector,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        pid: pid.map(str::to_string),
        action,
        resources,
        created_at_ms: now_ms(),
        detail,
    }
}
