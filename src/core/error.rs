//! Error types for allocator operations.

use thiserror::Error;

use crate::core::resource::ResourceType;

/// Errors produced by the allocator. All are recoverable and returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A declared max claim exceeds the total capacity of a resource.
    #[error("invalid claim for {pid}: {resource} claim {claim} exceeds total {total}")]
    InvalidClaim {
        /// Process identifier.
        pid: String,
        /// Offending resource type.
        resource: ResourceType,
        /// Declared claim.
        claim: u64,
        /// Total capacity of the resource.
        total: u64,
    },
    /// The process identifier is already registered.
    #[error("duplicate process: {0}")]
    DuplicateProcess(String),
    /// The process identifier is not registered.
    #[error("unknown process: {0}")]
    UnknownProcess(String),
    /// Granting would push the allocation past the declared max claim.
    #[error("{pid} exceeds max claim on {resource}: would hold {requested}, claim is {max_claim}")]
    ExceedsMaxClaim {
        /// Process identifier.
        pid: String,
        /// Offending resource type.
        resource: ResourceType,
        /// Allocation the process would hold after the grant.
        requested: u64,
        /// Declared max claim.
        max_claim: u64,
    },
    /// The requested units are not physically free right now.
    #[error("{resource} request of {requested} exceeds available {available}")]
    ExceedsAvailable {
        /// Offending resource type.
        resource: ResourceType,
        /// Units requested.
        requested: u64,
        /// Units currently free.
        available: u64,
    },
    /// Granting would push total allocation above the utilization cap.
    #[error("{resource} allocation would reach {requested_total}, above cap of {cap}")]
    ExceedsUtilizationCap {
        /// Offending resource type.
        resource: ResourceType,
        /// Total allocation across processes after the grant.
        requested_total: u64,
        /// Cap in units (`floor(total * utilization_cap)`).
        cap: u64,
    },
    /// A release asks to return more than the process holds.
    #[error("{pid} over-release on {resource}: releasing {requested}, holds {held}")]
    OverRelease {
        /// Process identifier.
        pid: String,
        /// Offending resource type.
        resource: ResourceType,
        /// Units the caller tried to release.
        requested: u64,
        /// Units actually held.
        held: u64,
    },
    /// The process already has a queued request.
    #[error("request already pending for {0}")]
    RequestPending(String),
    /// Persisted state failed schema or invariant validation.
    #[error("corrupt state: {0}")]
    CorruptState(String),
    /// Capacity totals or utilization cap are unusable.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Storage backend failure with context.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AllocError {
    /// Whether a queued request failing with this error may succeed later without
    /// any change on the requester's side.
    pub const fn is_deferrable(&self) -> bool {
        matches!(
            self,
            Self::ExceedsAvailable { .. } | Self::ExceedsUtilizationCap { .. }
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
