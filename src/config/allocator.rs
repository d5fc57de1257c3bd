//! Allocator configuration, read once at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{AllocError, Capacity, ResourceType, ResourceVector, DEFAULT_UTILIZATION_CAP};

/// What to do with persisted state at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Reload the last snapshot, allocations included.
    #[default]
    Restore,
    /// Reload registrations but zero every allocation.
    ResetAllocations,
    /// Ignore any snapshot and start empty.
    ResetAll,
}

impl FromStr for StartupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restore" => Ok(Self::Restore),
            "reset_allocations" => Ok(Self::ResetAllocations),
            "reset_all" => Ok(Self::ResetAll),
            other => Err(format!("unknown startup policy `{other}`")),
        }
    }
}

/// Root allocator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Total units per resource type.
    pub capacity: ResourceVector,
    /// Fraction of each total that may be allocated at once.
    pub utilization_cap: f64,
    /// Startup handling of persisted state.
    pub startup: StartupPolicy,
    /// Snapshot file location.
    pub state_path: PathBuf,
    /// Seconds between periodic snapshots.
    pub save_interval_secs: u64,
    /// Audit events kept in memory.
    pub max_history: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            capacity: ResourceVector::new(100, 1000, 1000, 100),
            utilization_cap: DEFAULT_UTILIZATION_CAP,
            startup: StartupPolicy::default(),
            state_path: PathBuf::from("states/current_state.json"),
            save_interval_secs: 60,
            max_history: 1000,
        }
    }
}

impl AllocatorConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity.is_zero() {
            return Err("capacity must have at least one non-zero resource".into());
        }
        if !self.utilization_cap.is_finite()
            || self.utilization_cap <= 0.0
            || self.utilization_cap > 1.0
        {
            return Err(format!(
                "utilization_cap must be in (0, 1], got {}",
                self.utilization_cap
            ));
        }
        if self.save_interval_secs == 0 {
            return Err("save_interval_secs must be greater than 0".into());
        }
        if self.max_history == 0 {
            return Err("max_history must be greater than 0".into());
        }
        if self.state_path.as_os_str().is_empty() {
            return Err("state_path must not be empty".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `RESGUARD_*` variables from the environment and an
    /// optional `.env` file, then validated.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `RESGUARD_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        for resource in ResourceType::ALL {
            let key = format!("RESGUARD_{}_UNITS", resource.as_str().to_ascii_uppercase());
            if let Some(raw) = lookup(&key) {
                self.capacity[resource] = parse_var(&key, &raw)?;
            }
        }
        if let Some(raw) = lookup("RESGUARD_UTILIZATION_CAP") {
            self.utilization_cap = parse_var("RESGUARD_UTILIZATION_CAP", &raw)?;
        }
        if let Some(raw) = lookup("RESGUARD_STARTUP_POLICY") {
            self.startup = raw.parse()?;
        }
        if let Some(raw) = lookup("RESGUARD_STATE_PATH") {
            self.state_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("RESGUARD_SAVE_INTERVAL_SECS") {
            self.save_interval_secs = parse_var("RESGUARD_SAVE_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("RESGUARD_MAX_HISTORY") {
            self.max_history = parse_var("RESGUARD_MAX_HISTORY", &raw)?;
        }
        Ok(())
    }

    /// Capacity described by this configuration.
    pub fn capacity(&self) -> Result<Capacity, AllocError> {
        Capacity::new(self.capacity, self.utilization_cap)
    }

    /// Interval between periodic snapshots.
    pub const fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}"))
}
