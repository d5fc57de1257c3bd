//! Versioned JSON encoding of the ledger.
//!
//! Loading re-validates everything: a document that parses but violates a ledger
//! invariant is rejected with [`AllocError::CorruptState`] rather than repaired.

use serde::{Deserialize, Serialize};

use crate::core::error::AllocError;
use crate::core::ledger::{Capacity, Ledger, ProcessId, ProcessRecord, ProcessStatus};
use crate::core::resource::ResourceVector;
use crate::util::clock::now_ms;

/// Layout version of the persisted document.
pub const SCHEMA_VERSION: u32 = 1;

/// Persisted ledger document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedState {
    /// Document layout version, always [`SCHEMA_VERSION`].
    pub schema: u32,
    /// Monotonic save sequence number.
    pub version: u64,
    /// Save time, milliseconds since epoch.
    pub saved_at_ms: u128,
    /// Total units per resource.
    pub capacity: ResourceVector,
    /// Fraction of each total that may be allocated.
    pub utilization_cap: f64,
    /// Registered processes.
    pub processes: Vec<PersistedProcess>,
}

/// One persisted process record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedProcess {
    /// Process identifier.
    pub pid: ProcessId,
    /// Declared max claim.
    pub max_claim: ResourceVector,
    /// Held units.
    pub allocation: ResourceVector,
    /// Status at save time.
    pub status: ProcessStatus,
    /// Last mutation, milliseconds since epoch.
    pub last_updated_ms: u128,
}

/// Ledger rebuilt from a persisted document.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredLedger {
    /// The validated ledger.
    pub ledger: Ledger,
    /// Save sequence number of the document.
    pub version: u64,
    /// When the document was written.
    pub saved_at_ms: u128,
}

/// Abstraction for durable snapshot storage backends.
pub trait StateStore: Send + Sync {
    /// Replace the stored snapshot with `bytes`.
    fn write(&self, bytes: &[u8]) -> Result<(), AllocError>;
    /// The last stored snapshot, or `None` if nothing was ever written.
    fn read(&self) -> Result<Option<Vec<u8>>, AllocError>;
}

/// Encode `ledger` as a versioned JSON document.
pub fn save(ledger: &Ledger, version: u64) -> Result<Vec<u8>, AllocError> {
    let doc = PersistedState {
        schema: SCHEMA_VERSION,
        version,
        saved_at_ms: now_ms(),
        capacity: ledger.capacity().total(),
        utilization_cap: ledger.capacity().utilization_cap(),
        processes: ledger
            .records()
            .map(|r| PersistedProcess {
                pid: r.pid.clone(),
                max_claim: r.max_claim,
                allocation: r.allocation,
                status: r.status,
                last_updated_ms: r.last_updated_ms,
            })
            .collect(),
    };
    serde_json::to_vec_pretty(&doc).map_err(|e| AllocError::Storage(e.to_string()))
}

/// Decode and validate a document produced by [`save`].
///
/// The wait queue is not persisted, so Waiting processes come back as Running or
/// Registered depending on what they hold.
pub fn load(bytes: &[u8]) -> Result<RestoredLedger, AllocError> {
    let doc: PersistedState =
        serde_json::from_slice(bytes).map_err(|e| AllocError::CorruptState(e.to_string()))?;
    if doc.schema != SCHEMA_VERSION {
        return Err(AllocError::CorruptState(format!(
            "schema {} not supported (expected {SCHEMA_VERSION})",
            doc.schema
        )));
    }
    let capacity = Capacity::new(doc.capacity, doc.utilization_cap)
        .map_err(|e| AllocError::CorruptState(e.to_string()))?;

    let records = doc.processes.into_iter().map(|p| {
        let mut record = ProcessRecord {
            pid: p.pid,
            max_claim: p.max_claim,
            allocation: p.allocation,
            status: p.status,
            last_updated_ms: p.last_updated_ms,
        };
        if record.status == ProcessStatus::Waiting {
            record.status = record.settled_status();
        }
        record
    });
    let ledger = Ledger::from_records(capacity, records)?;
    if !ledger.is_safe() {
        return Err(AllocError::CorruptState("persisted state is unsafe".into()));
    }

    Ok(RestoredLedger {
        ledger,
        version: doc.version,
        saved_at_ms: doc.saved_at_ms,
    })
}
