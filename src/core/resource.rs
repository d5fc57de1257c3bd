//! Resource kinds and fixed-width unit vectors.

use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Kinds of resource tracked by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Processor units.
    Cpu,
    /// Memory units.
    Memory,
    /// Disk units.
    Disk,
    /// Network bandwidth units.
    Network,
}

impl ResourceType {
    /// Every resource type, in ledger order.
    pub const ALL: [Self; 4] = [Self::Cpu, Self::Memory, Self::Disk, Self::Network];

    /// Lower-case name used in logs and persisted documents.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount of each resource type, in accounting units.
///
/// Used for capacity totals, max claims, allocations and request deltas alike.
/// Serialized as a map keyed by resource name; missing keys read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceVector {
    /// CPU units.
    pub cpu: u64,
    /// Memory units.
    pub memory: u64,
    /// Disk units.
    pub disk: u64,
    /// Network units.
    pub network: u64,
}

impl ResourceVector {
    /// All components zero.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    /// Build a vector from its four components.
    pub const fn new(cpu: u64, memory: u64, disk: u64, network: u64) -> Self {
        Self {
            cpu,
            memory,
            disk,
            network,
        }
    }

    /// Vector holding `units` of a single resource type.
    pub fn of(resource: ResourceType, units: u64) -> Self {
        let mut v = Self::ZERO;
        v[resource] = units;
        v
    }

    /// Iterate `(type, units)` pairs in ledger order.
    pub fn iter(self) -> impl Iterator<Item = (ResourceType, u64)> {
        ResourceType::ALL.into_iter().map(move |r| (r, self[r]))
    }

    /// True when every component is zero.
    pub fn is_zero(self) -> bool {
        self.iter().all(|(_, units)| units == 0)
    }

    /// Component-wise `self <= limit`.
    pub fn fits_within(self, limit: Self) -> bool {
        self.first_exceeding(limit).is_none()
    }

    /// First resource type (in ledger order) where `self` exceeds `limit`.
    pub fn first_exceeding(self, limit: Self) -> Option<ResourceType> {
        ResourceType::ALL.into_iter().find(|&r| self[r] > limit[r])
    }

    /// Component-wise addition, `None` on overflow.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        Some(Self::new(
            self.cpu.checked_add(other.cpu)?,
            self.memory.checked_add(other.memory)?,
            self.disk.checked_add(other.disk)?,
            self.network.checked_add(other.network)?,
        ))
    }

    /// Component-wise subtraction, `None` if any component would go negative.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        Some(Self::new(
            self.cpu.checked_sub(other.cpu)?,
            self.memory.checked_sub(other.memory)?,
            self.disk.checked_sub(other.disk)?,
            self.network.checked_sub(other.network)?,
        ))
    }

    /// Component-wise subtraction clamped at zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self::new(
            self.cpu.saturating_sub(other.cpu),
            self.memory.saturating_sub(other.memory),
            self.disk.saturating_sub(other.disk),
            self.network.saturating_sub(other.network),
        )
    }
}

impl Index<ResourceType> for ResourceVector {
    type Output = u64;

    fn index(&self, resource: ResourceType) -> &u64 {
        match resource {
            ResourceType::Cpu => &self.cpu,
            ResourceType::Memory => &self.memory,
            ResourceType::Disk => &self.disk,
            ResourceType::Network => &self.network,
        }
    }
}

impl IndexMut<ResourceType> for ResourceVector {
    fn index_mut(&mut self, resource: ResourceType) -> &mut u64 {
        match resource {
            ResourceType::Cpu => &mut self.cpu,
            ResourceType::Memory => &mut self.memory,
            ResourceType::Disk => &mut self.disk,
            ResourceType::Network => &mut self.network,
        }
    }
}

/// Saturating component-wise addition.
impl Add for ResourceVector {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.cpu.saturating_add(other.cpu),
            self.memory.saturating_add(other.memory),
            self.disk.saturating_add(other.disk),
            self.network.saturating_add(other.network),
        )
    }
}

impl AddAssign for ResourceVector {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[cpu={}, memory={}, disk={}, network={}]",
            self.cpu, self.memory, self.disk, self.network
        )
    }
}
