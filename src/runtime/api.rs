//! Serializable request/response and reporting models for presentation layers.

use serde::{Deserialize, Serialize};

use crate::core::{
    AllocError, LedgerSnapshot, ProcessId, ProcessRecord, RequestOutcome, ResourceType,
    WaitingRequest,
};

/// How a request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDisposition {
    /// Units committed.
    Granted,
    /// Parked until granting is safe.
    Queued,
    /// Refused with a reason.
    Rejected,
}

/// Request response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestResponse {
    /// Requesting process.
    pub pid: ProcessId,
    /// Outcome.
    pub disposition: RequestDisposition,
    /// Rejection reason.
    pub reason: Option<String>,
}

impl RequestResponse {
    /// Map the result of [`ResourceManager::request`](crate::core::ResourceManager::request).
    pub fn from_result(pid: &str, result: &Result<RequestOutcome, AllocError>) -> Self {
        let (disposition, reason) = match result {
            Ok(RequestOutcome::Granted) => (RequestDisposition::Granted, None),
            Ok(RequestOutcome::Queued(_)) => (RequestDisposition::Queued, None),
            Err(e) => (RequestDisposition::Rejected, Some(e.to_string())),
        };
        Self {
            pid: pid.to_string(),
            disposition,
            reason,
        }
    }
}

/// Usage of one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resource type.
    pub resource: ResourceType,
    /// Installed units.
    pub total: u64,
    /// Units held by processes.
    pub allocated: u64,
    /// Units free.
    pub available: u64,
    /// Most units that may be allocated at once.
    pub cap_units: u64,
    /// Allocated share of total, 0 when total is 0.
    pub utilization_percent: f64,
}

/// Full utilization report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationReport {
    /// One entry per resource type.
    pub resources: Vec<ResourceUsage>,
    /// Registered processes in pid order.
    pub processes: Vec<ProcessRecord>,
    /// Queued requests, oldest first.
    pub waiting: Vec<WaitingRequest>,
    /// Whether the ledger is in a safe state.
    pub safe: bool,
    /// Last save sequence number.
    pub version: u64,
    /// Snapshot time, milliseconds since epoch.
    pub taken_at_ms: u128,
}

/// Build a utilization report from a snapshot.
pub fn utilization_report(snapshot: &LedgerSnapshot) -> UtilizationReport {
    let ledger = &snapshot.ledger;
    let capacity = ledger.capacity();
    let total = capacity.total();
    let allocated = ledger.allocated();
    let available = ledger.available();

    let resources = ResourceType::ALL
        .into_iter()
        .map(|resource| ResourceUsage {
            resource,
            total: total[resource],
            allocated: allocated[resource],
            available: available[resource],
            cap_units: capacity.cap_units(resource),
            utilization_percent: percent(allocated[resource], total[resource]),
        })
        .collect();

    UtilizationReport {
        resources,
        processes: ledger.records().cloned().collect(),
        waiting: snapshot.waiting.clone(),
        safe: ledger.is_safe(),
        version: snapshot.version,
        taken_at_ms: snapshot.taken_at_ms,
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: invariants hold and the state is safe.
    pub ok: bool,
    /// Registered processes.
    pub processes: usize,
    /// Queued requests.
    pub waiting: usize,
    /// First violated invariant, if any.
    pub problem: Option<String>,
}

/// Check a snapshot for consistency.
pub fn health(snapshot: &LedgerSnapshot) -> Health {
    let problem = snapshot.ledger.check_invariants().err();
    Health {
        ok: problem.is_none(),
        processes: snapshot.ledger.len(),
        waiting: snapshot.waiting.len(),
        problem,
    }
}
