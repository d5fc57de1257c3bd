//! Allocation engine: ledger, safety checker, request coordination and persistence.

pub mod audit;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod persistence;
pub mod resource;
pub mod safety;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use coordinator::{GrantTicket, RequestOutcome, WaitOutcome, WaitingRequest};
pub use error::{AllocError, AppResult};
pub use ledger::{
    Capacity, Ledger, ProcessId, ProcessRecord, ProcessStatus, DEFAULT_UTILIZATION_CAP,
};
pub use manager::{LedgerSnapshot, ResourceManager};
pub use persistence::{RestoredLedger, StateStore};
pub use resource::{ResourceType, ResourceVector};
