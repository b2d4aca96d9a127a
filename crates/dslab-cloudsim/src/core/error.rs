//! Configuration errors detected while building simulation entities.

use thiserror::Error;

use crate::core::common::{CloudletId, GuestId, PeId};

/// Inconsistency in the simulation setup. Such errors abort the construction of the affected entity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{pe} has non-positive capacity {mips}")]
    InvalidPeCapacity { pe: PeId, mips: f64 },

    #[error("{entity} has no processing elements")]
    NoProcessingElements { entity: String },

    #[error("{guest} must have positive MIPS and at least one PE, got {mips} MIPS and {pes} PEs")]
    InvalidGuestCapacity { guest: GuestId, mips: f64, pes: u32 },

    #[error("{guest} declares {declared} PEs but its PE list has {actual}")]
    PeCountMismatch { guest: GuestId, declared: u32, actual: usize },

    #[error("{guest} declares {declared} MIPS in total, below {required} MIPS of its PE list")]
    MipsBelowPes { guest: GuestId, declared: f64, required: f64 },

    #[error("{cloudlet} must have positive length and PE count")]
    InvalidCloudlet { cloudlet: CloudletId },

    #[error("invalid utilization trace: {reason}")]
    InvalidTrace { reason: String },

    #[error("can't resolve {kind}: {value}")]
    UnknownPolicy { kind: &'static str, value: String },

    #[error("invalid value of option {name} in {value}")]
    InvalidOption { name: String, value: String },

    #[error("can't read file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't parse YAML from {path}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
