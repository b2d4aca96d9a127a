//! Selection policies choosing a host for a guest or a guest for migration.

use std::collections::BTreeSet;

use crate::core::common::{GuestId, HostId};
use crate::core::config::options::{parse_config_value, parse_option, parse_options};
use crate::core::error::ConfigError;
use crate::core::guest::Guest;
use crate::core::guest_host::GuestHost;
use crate::core::guest_scheduler::GuestScheduler;
use crate::core::host::Host;

pub use crate::core::selection_policies::first_fit::FirstFit;
pub use crate::core::selection_policies::least_full::LeastFull;
pub use crate::core::selection_policies::maximum_correlation::MaximumCorrelation;
pub use crate::core::selection_policies::maximum_usage::MaximumUsage;
pub use crate::core::selection_policies::minimum_migration_time::MinimumMigrationTime;
pub use crate::core::selection_policies::most_full::MostFull;
pub use crate::core::selection_policies::random::RandomSelection;
pub use crate::core::selection_policies::worst_fit::WorstFit;

/// Entity which can be chosen by a selection policy.
pub trait Selectable {
    type Id: Copy + Ord;

    fn selection_id(&self) -> Self::Id;

    /// Returns the current utilization as a fraction of capacity.
    fn utilization(&self) -> f64;

    /// Returns the current utilization in MIPS.
    fn utilization_mips(&self) -> f64;

    fn free_pe_count(&self) -> usize;

    /// Returns recent utilization samples, oldest first.
    fn utilization_history(&self) -> Vec<f64>;

    fn ram(&self) -> u64;

    /// Checks whether the guest can be placed on this entity.
    fn is_suitable_for(&self, guest: &Guest) -> bool;
}

impl Selectable for Host {
    type Id = HostId;

    fn selection_id(&self) -> HostId {
        self.id()
    }

    fn utilization(&self) -> f64 {
        Host::utilization(self)
    }

    fn utilization_mips(&self) -> f64 {
        Host::utilization_mips(self)
    }

    fn free_pe_count(&self) -> usize {
        self.scheduler().free_pe_count()
    }

    fn utilization_history(&self) -> Vec<f64> {
        Host::utilization_history(self).iter().copied().collect()
    }

    fn ram(&self) -> u64 {
        Host::ram(self)
    }

    fn is_suitable_for(&self, guest: &Guest) -> bool {
        self.is_suitable_for_guest(guest)
    }
}

impl Selectable for Guest {
    type Id = GuestId;

    fn selection_id(&self) -> GuestId {
        self.id()
    }

    fn utilization(&self) -> f64 {
        self.current_allocated_total_mips() / self.total_mips()
    }

    fn utilization_mips(&self) -> f64 {
        self.current_allocated_total_mips()
    }

    fn free_pe_count(&self) -> usize {
        self.hosting().map_or(0, |hosting| hosting.scheduler().free_pe_count())
    }

    fn utilization_history(&self) -> Vec<f64> {
        Guest::utilization_history(self).iter().copied().collect()
    }

    fn ram(&self) -> u64 {
        Guest::ram(self)
    }

    fn is_suitable_for(&self, guest: &Guest) -> bool {
        guest.id() != self.id() && self.is_suitable_for_guest(guest)
    }
}

/// Trait for implementation of selection policies.
///
/// A policy chooses one of the candidates which is not excluded and, if the requester is specified, is suitable for
/// it. Policies never change the state of candidates.
pub trait SelectionPolicy<T: Selectable> {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T>;
}

/// Returns candidates which are not excluded and are suitable for the requester.
pub fn eligible<'a, T: Selectable>(
    candidates: &[&'a T],
    requester: Option<&Guest>,
    excluded: &BTreeSet<T::Id>,
) -> Vec<&'a T> {
    candidates
        .iter()
        .copied()
        .filter(|c| !excluded.contains(&c.selection_id()))
        .filter(|c| requester.map_or(true, |guest| c.is_suitable_for(guest)))
        .collect()
}

/// Creates selection policy from a config string like `Random[seed=42]`.
pub fn selection_policy_resolver<T: Selectable>(config_str: &str) -> Result<Box<dyn SelectionPolicy<T>>, ConfigError> {
    let (policy_name, options) = parse_config_value(config_str);
    match policy_name.as_str() {
        "FirstFit" => Ok(Box::new(FirstFit::new())),
        "LeastFull" => Ok(Box::new(LeastFull::new())),
        "MostFull" => Ok(Box::new(MostFull::new())),
        "WorstFit" => Ok(Box::new(WorstFit::new())),
        "Random" => {
            let options = parse_options(options.as_deref().unwrap_or(""));
            Ok(Box::new(RandomSelection::new(parse_option(&options, "seed", 0)?)))
        }
        "MaximumUsage" => Ok(Box::new(MaximumUsage::new())),
        "MinimumMigrationTime" => Ok(Box::new(MinimumMigrationTime::new())),
        "MaximumCorrelation" => Ok(Box::new(MaximumCorrelation::new())),
        _ => Err(ConfigError::UnknownPolicy {
            kind: "selection policy",
            value: config_str.to_string(),
        }),
    }
}
