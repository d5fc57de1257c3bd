//! Allocation ledger: capacity, per-process records, and the invariants tying them together.
//!
//! The ledger owns no lock. [`ResourceManager`](crate::core::ResourceManager) wraps it
//! and is the only path that mutates it after startup.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::AllocError;
use crate::core::resource::{ResourceType, ResourceVector};
use crate::core::safety;

/// Process identifier, unique within a ledger.
pub type ProcessId = String;

/// Default fraction of each total that may be allocated at once.
pub const DEFAULT_UTILIZATION_CAP: f64 = 0.90;

/// Absorbs float error so that e.g. `100 * 0.29` yields 29 units, not 28.
const CAP_EPSILON: f64 = 1e-9;

/// Capacity totals plus the utilization cap. Immutable after startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    total: ResourceVector,
    utilization_cap: f64,
}

impl Capacity {
    /// Build a capacity, rejecting caps outside `(0, 1]`.
    pub fn new(total: ResourceVector, utilization_cap: f64) -> Result<Self, AllocError> {
        if !utilization_cap.is_finite() || utilization_cap <= 0.0 || utilization_cap > 1.0 {
            return Err(AllocError::InvalidCapacity(format!(
                "utilization cap must be in (0, 1], got {utilization_cap}"
            )));
        }
        Ok(Self {
            total,
            utilization_cap,
        })
    }

    /// Capacity with the default 90% cap.
    pub fn with_default_cap(total: ResourceVector) -> Self {
        Self {
            total,
            utilization_cap: DEFAULT_UTILIZATION_CAP,
        }
    }

    /// Total units per resource.
    pub const fn total(&self) -> ResourceVector {
        self.total
    }

    /// Fraction of each total that may be allocated simultaneously.
    pub const fn utilization_cap(&self) -> f64 {
        self.utilization_cap
    }

    /// Maximum units of `resource` that may be allocated across all processes.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn cap_units(&self, resource: ResourceType) -> u64 {
        let total = self.total[resource];
        let units = (total as f64 * self.utilization_cap + CAP_EPSILON).floor() as u64;
        units.min(total)
    }

    /// [`cap_units`](Self::cap_units) for every resource.
    pub fn cap_vector(&self) -> ResourceVector {
        let mut caps = ResourceVector::ZERO;
        for r in ResourceType::ALL {
            caps[r] = self.cap_units(r);
        }
        caps
    }
}

/// Lifecycle status of a registered process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Registered and holding nothing.
    Registered,
    /// Has a request parked in the wait queue.
    Waiting,
    /// Holds at least one granted unit.
    Running,
    /// Gave everything back and left the ledger.
    Released,
    /// Marked failed by its owner, or its queued request was rejected.
    Error,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registered => "registered",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Released => "released",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-process allocation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Process identifier.
    pub pid: ProcessId,
    /// Most the process will ever hold at once.
    pub max_claim: ResourceVector,
    /// Currently held units.
    pub allocation: ResourceVector,
    /// Lifecycle status.
    pub status: ProcessStatus,
    /// Last mutation, milliseconds since epoch.
    pub last_updated_ms: u128,
}

impl ProcessRecord {
    /// Fresh registration with nothing allocated.
    pub const fn new(pid: ProcessId, max_claim: ResourceVector, now_ms: u128) -> Self {
        Self {
            pid,
            max_claim,
            allocation: ResourceVector::ZERO,
            status: ProcessStatus::Registered,
            last_updated_ms: now_ms,
        }
    }

    /// Remaining units the process may still request (`max_claim - allocation`).
    pub fn need(&self) -> ResourceVector {
        self.max_claim.saturating_sub(self.allocation)
    }

    /// Status implied by the allocation alone: Running if anything is held.
    pub fn settled_status(&self) -> ProcessStatus {
        if self.allocation.is_zero() {
            ProcessStatus::Registered
        } else {
            ProcessStatus::Running
        }
    }
}

/// The allocation ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    capacity: Capacity,
    available: ResourceVector,
    processes: BTreeMap<ProcessId, ProcessRecord>,
}

impl Ledger {
    /// Empty ledger with everything available.
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            available: capacity.total(),
            processes: BTreeMap::new(),
        }
    }

    /// Rebuild a ledger from stored records, deriving `available` and validating
    /// totals, claims and the cap. Does not check safety.
    pub fn from_records<I>(capacity: Capacity, records: I) -> Result<Self, AllocError>
    where
        I: IntoIterator<Item = ProcessRecord>,
    {
        let mut processes = BTreeMap::new();
        for record in records {
            if processes.contains_key(&record.pid) {
                return Err(AllocError::CorruptState(format!(
                    "duplicate process {}",
                    record.pid
                )));
            }
            processes.insert(record.pid.clone(), record);
        }
        let allocated = processes
            .values()
            .map(|r: &ProcessRecord| r.allocation)
            .try_fold(ResourceVector::ZERO, ResourceVector::checked_add)
            .ok_or_else(|| AllocError::CorruptState("allocation overflow".into()))?;
        let available = capacity.total().checked_sub(allocated).ok_or_else(|| {
            AllocError::CorruptState(format!(
                "allocated {allocated} exceeds total {}",
                capacity.total()
            ))
        })?;
        let ledger = Self {
            capacity,
            available,
            processes,
        };
        ledger
            .check_bounds()
            .map_err(AllocError::CorruptState)?;
        Ok(ledger)
    }

    /// Capacity totals and cap.
    pub const fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    /// Units not held by any process.
    pub const fn available(&self) -> ResourceVector {
        self.available
    }

    /// Units held across all processes.
    pub fn allocated(&self) -> ResourceVector {
        self.capacity.total().saturating_sub(self.available)
    }

    /// Record for `pid`, if registered.
    pub fn get(&self, pid: &str) -> Option<&ProcessRecord> {
        self.processes.get(pid)
    }

    /// All records in pid order.
    pub fn records(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.processes.values()
    }

    /// Number of registered processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// True when no process is registered.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Runs the safety checker against the current state.
    pub fn is_safe(&self) -> bool {
        safety::is_safe(self.available, self.processes.values())
    }

    /// Finishing order proving the current state safe.
    pub fn safe_sequence(&self) -> Option<Vec<ProcessId>> {
        safety::safe_sequence(self.available, self.processes.values())
    }

    /// Verifies all four ledger invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        let allocated = self
            .processes
            .values()
            .fold(ResourceVector::ZERO, |acc, r| acc + r.allocation);
        if allocated + self.available != self.capacity.total() {
            return Err(format!(
                "available {} plus allocated {allocated} differs from total {}",
                self.available,
                self.capacity.total()
            ));
        }
        self.check_bounds()?;
        if !self.is_safe() {
            return Err("ledger is not in a safe state".into());
        }
        Ok(())
    }

    /// Allocations within claims, claims within totals, and the utilization cap.
    fn check_bounds(&self) -> Result<(), String> {
        let total = self.capacity.total();
        for record in self.processes.values() {
            if let Some(r) = record.max_claim.first_exceeding(total) {
                return Err(format!(
                    "{} claims {} {r}, total is {}",
                    record.pid, record.max_claim[r], total[r]
                ));
            }
            if let Some(r) = record.allocation.first_exceeding(record.max_claim) {
                return Err(format!(
                    "{} holds {} {r}, claim is {}",
                    record.pid, record.allocation[r], record.max_claim[r]
                ));
            }
        }
        if let Some(r) = self.allocated().first_exceeding(self.capacity.cap_vector()) {
            return Err(format!(
                "{r} allocation {} exceeds cap {}",
                self.allocated()[r],
                self.capacity.cap_units(r)
            ));
        }
        Ok(())
    }

    /// Admission checks in order: unknown process, max claim, availability, cap.
    pub fn check_request(&self, pid: &str, delta: ResourceVector) -> Result<(), AllocError> {
        let record = self
            .processes
            .get(pid)
            .ok_or_else(|| AllocError::UnknownProcess(pid.to_string()))?;

        let wanted = record.allocation + delta;
        if let Some(resource) = wanted.first_exceeding(record.max_claim) {
            return Err(AllocError::ExceedsMaxClaim {
                pid: pid.to_string(),
                resource,
                requested: wanted[resource],
                max_claim: record.max_claim[resource],
            });
        }
        if let Some(resource) = delta.first_exceeding(self.available) {
            return Err(AllocError::ExceedsAvailable {
                resource,
                requested: delta[resource],
                available: self.available[resource],
            });
        }
        let total_after = self.allocated() + delta;
        if let Some(resource) = total_after.first_exceeding(self.capacity.cap_vector()) {
            return Err(AllocError::ExceedsUtilizationCap {
                resource,
                requested_total: total_after[resource],
                cap: self.capacity.cap_units(resource),
            });
        }
        Ok(())
    }

    /// Tentatively applies `delta` and keeps it only if the result is safe.
    ///
    /// Returns `Ok(true)` when committed, `Ok(false)` when rolled back as unsafe.
    /// Status is left for the caller to set.
    pub(crate) fn try_grant(
        &mut self,
        pid: &str,
        delta: ResourceVector,
    ) -> Result<bool, AllocError> {
        self.check_request(pid, delta)?;
        self.shift(pid, delta, true);
        if self.is_safe() {
            return Ok(true);
        }
        self.shift(pid, delta, false);
        Ok(false)
    }

    /// Returns `delta` units from `pid` to the pool.
    pub(crate) fn release(&mut self, pid: &str, delta: ResourceVector) -> Result<(), AllocError> {
        let record = self
            .processes
            .get(pid)
            .ok_or_else(|| AllocError::UnknownProcess(pid.to_string()))?;
        if let Some(resource) = delta.first_exceeding(record.allocation) {
            return Err(AllocError::OverRelease {
                pid: pid.to_string(),
                resource,
                requested: delta[resource],
                held: record.allocation[resource],
            });
        }
        self.shift(pid, delta, false);
        Ok(())
    }

    /// Moves `delta` between `available` and `pid`'s allocation. Callers have already
    /// validated bounds, so the saturating arithmetic never clamps.
    fn shift(&mut self, pid: &str, delta: ResourceVector, grant: bool) {
        if let Some(record) = self.processes.get_mut(pid) {
            if grant {
                record.allocation += delta;
                self.available = self.available.saturating_sub(delta);
            } else {
                record.allocation = record.allocation.saturating_sub(delta);
                self.available += delta;
            }
        }
    }

    pub(crate) fn set_status(&mut self, pid: &str, status: ProcessStatus, now_ms: u128) {
        if let Some(record) = self.processes.get_mut(pid) {
            record.status = status;
            record.last_updated_ms = now_ms;
        }
    }

    pub(crate) fn insert(&mut self, record: ProcessRecord) {
        self.processes.insert(record.pid.clone(), record);
    }

    /// Removes `pid`, returning its units to the pool.
    pub(crate) fn remove(&mut self, pid: &str) -> Option<ProcessRecord> {
        let record = self.processes.remove(pid)?;
        self.available += record.allocation;
        Some(record)
    }

    /// Zeroes every allocation; drops all records unless `keep_registrations`.
    pub(crate) fn clear_allocations(&mut self, keep_registrations: bool, now_ms: u128) {
        self.available = self.capacity.total();
        if keep_registrations {
            for record in self.processes.values_mut() {
                record.allocation = ResourceVector::ZERO;
                record.status = ProcessStatus::Registered;
                record.last_updated_ms = now_ms;
            }
        } else {
            self.processes.clear();
        }
    }
}
