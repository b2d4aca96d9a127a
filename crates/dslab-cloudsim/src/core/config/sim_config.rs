//! Simulation configuration.

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawSimulationConfig {
    pub min_time_between_events: Option<f64>,
    pub scheduling_interval: Option<f64>,
    pub migration_bandwidth_share: Option<f64>,
    pub hosts: Option<Vec<HostConfig>>,
    pub allocation: Option<String>,
    pub migration: Option<String>,
}

/// Holds configuration of a single physical host or a set of identical hosts.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    /// Number of host PEs.
    pub pes: u32,
    /// Capacity of a single PE in MIPS.
    pub pe_mips: f64,
    /// RAM capacity in MB.
    pub ram: u64,
    /// Bandwidth capacity in Mbit/s.
    pub bw: u64,
    /// Storage capacity in MB.
    pub storage: u64,
    /// Guest scheduler used by host(s): `TimeShared`, `TimeSharedOverSubscription` or `SpaceShared`.
    pub guest_scheduler: Option<String>,
    /// Number of such hosts.
    pub count: Option<u32>,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Minimal time between two processing updates of a datacenter.
    pub min_time_between_events: f64,
    /// Maximal time between two processing updates while some cloudlets are running, 0 to disable.
    pub scheduling_interval: f64,
    /// Fraction of the host bandwidth used for guest migration.
    pub migration_bandwidth_share: f64,
    /// Configurations of physical hosts.
    pub hosts: Vec<HostConfig>,
    /// Selection policy used to place guests on hosts.
    pub allocation: String,
    /// Migration policy, no migrations are proposed if absent.
    pub migration: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::from_raw(RawSimulationConfig {
            min_time_between_events: None,
            scheduling_interval: None,
            migration_bandwidth_share: None,
            hosts: None,
            allocation: None,
            migration: None,
        })
    }
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml(&content, file_name)
    }

    /// Parses simulation config from YAML string, `origin` is used in error messages.
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: origin.to_string(),
            source,
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSimulationConfig) -> Self {
        Self {
            min_time_between_events: raw.min_time_between_events.unwrap_or(0.01),
            scheduling_interval: raw.scheduling_interval.unwrap_or(300.),
            migration_bandwidth_share: raw.migration_bandwidth_share.unwrap_or(0.5),
            hosts: raw.hosts.unwrap_or_default(),
            allocation: raw.allocation.unwrap_or_else(|| "FirstFit".to_string()),
            migration: raw.migration,
        }
    }

    /// Returns the total number of hosts after expanding host counts.
    pub fn number_of_hosts(&self) -> u32 {
        self.hosts.iter().map(|host| host.count.unwrap_or(1)).sum()
    }
}
