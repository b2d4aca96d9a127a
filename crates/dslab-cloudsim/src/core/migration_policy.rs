//! Migration policies proposing guest migrations to optimize the allocation.

use std::cell::Ref;
use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::Serialize;

use crate::core::common::{GuestId, HostId};
use crate::core::config::options::{parse_config_value, parse_option, parse_options};
use crate::core::error::ConfigError;
use crate::core::guest::Guest;
use crate::core::guest_host::GuestHost;
use crate::core::guest_registry::GuestRegistry;
use crate::core::guest_scheduler::GuestScheduler;
use crate::core::host::Host;
use crate::core::selection_policy::{selection_policy_resolver, SelectionPolicy};

/// Proposed migration of a guest between two hosts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationProposal {
    pub guest: GuestId,
    pub source: HostId,
    pub target: HostId,
}

/// Trait for implementation of migration policies.
pub trait MigrationPolicy {
    /// Returns migrations which should be started, policies never change the state of hosts or guests.
    fn optimize_allocation(&mut self, hosts: &IndexMap<HostId, Host>, registry: &GuestRegistry)
        -> Vec<MigrationProposal>;
}

/// Never proposes migrations.
#[derive(Default)]
pub struct NoMigration;

impl MigrationPolicy for NoMigration {
    fn optimize_allocation(
        &mut self,
        _hosts: &IndexMap<HostId, Host>,
        _registry: &GuestRegistry,
    ) -> Vec<MigrationProposal> {
        Vec::new()
    }
}

/// Moves guests off hosts whose utilization exceeds the fixed threshold.
///
/// Guests are picked from an over-utilized host with the guest selection policy until the host utilization falls
/// to the threshold. Each picked guest is placed on a host chosen by the host selection policy among other hosts which
/// can accommodate the guest and stay under the threshold. Guests which are already being migrated are skipped.
pub struct StaticThresholdMigration {
    upper_threshold: f64,
    guest_selection: Box<dyn SelectionPolicy<Guest>>,
    host_selection: Box<dyn SelectionPolicy<Host>>,
}

impl StaticThresholdMigration {
    pub fn new(
        upper_threshold: f64,
        guest_selection: Box<dyn SelectionPolicy<Guest>>,
        host_selection: Box<dyn SelectionPolicy<Host>>,
    ) -> Self {
        Self {
            upper_threshold,
            guest_selection,
            host_selection,
        }
    }

    pub fn upper_threshold(&self) -> f64 {
        self.upper_threshold
    }

    fn is_over_threshold(&self, load: f64, host: &Host) -> bool {
        load / host.total_mips() > self.upper_threshold
    }
}

impl MigrationPolicy for StaticThresholdMigration {
    fn optimize_allocation(
        &mut self,
        hosts: &IndexMap<HostId, Host>,
        registry: &GuestRegistry,
    ) -> Vec<MigrationProposal> {
        let mut planned_load: BTreeMap<HostId, f64> = hosts
            .values()
            .map(|host| (host.id(), expected_load(host, registry)))
            .collect();
        let mut proposals = Vec::new();
        let mut picked: BTreeSet<GuestId> = BTreeSet::new();

        for source in hosts.values() {
            if source.is_failed() {
                continue;
            }
            let guests: Vec<Ref<Guest>> = source
                .state()
                .guests()
                .iter()
                .filter_map(|id| registry.get(*id))
                .map(|guest| guest.borrow())
                .collect();
            for guest in guests.iter().filter(|guest| guest.in_migration()) {
                picked.insert(guest.id());
            }
            let candidates: Vec<&Guest> = guests.iter().map(|guest| &**guest).collect();

            while self.is_over_threshold(planned_load[&source.id()], source) {
                let guest = match self.guest_selection.select(&candidates, None, &picked) {
                    Some(guest) => guest,
                    None => break,
                };
                picked.insert(guest.id());
                let demand = guest.current_requested_total_mips();

                let mut excluded: BTreeSet<HostId> = hosts
                    .values()
                    .filter(|host| self.is_over_threshold(planned_load[&host.id()] + demand, host))
                    .map(|host| host.id())
                    .collect();
                excluded.insert(source.id());
                let targets: Vec<&Host> = hosts.values().collect();
                let target = match self.host_selection.select(&targets, Some(guest), &excluded) {
                    Some(target) => target.id(),
                    None => continue,
                };

                *planned_load.entry(source.id()).or_default() -= guest.current_allocated_total_mips();
                *planned_load.entry(target).or_default() += demand;
                proposals.push(MigrationProposal {
                    guest: guest.id(),
                    source: source.id(),
                    target,
                });
            }
        }
        proposals
    }
}

/// Returns the load of a host after migrations in progress: guests migrating out are not counted and guests
/// migrating in are counted with their full demand.
fn expected_load(host: &Host, registry: &GuestRegistry) -> f64 {
    let mut load = 0.;
    for id in host.state().guests() {
        if let Some(guest) = registry.get(*id) {
            if !guest.borrow().in_migration() {
                load += host.scheduler().total_allocated_mips_for(*id);
            }
        }
    }
    for id in host.state().migrating_in() {
        if let Some(guest) = registry.get(*id) {
            load += guest.borrow().current_requested_total_mips();
        }
    }
    load
}

/// Creates migration policy from a config string like
/// `StaticThreshold[threshold=0.8,guest_selection=MinimumMigrationTime,host_selection=LeastFull]`.
pub fn migration_policy_resolver(config_str: &str) -> Result<Box<dyn MigrationPolicy>, ConfigError> {
    let (policy_name, options) = parse_config_value(config_str);
    let options = parse_options(options.as_deref().unwrap_or(""));
    match policy_name.as_str() {
        "NoMigration" => Ok(Box::new(NoMigration)),
        "StaticThreshold" => {
            let threshold = parse_option(&options, "threshold", 0.8)?;
            if !(0. ..=1.).contains(&threshold) {
                return Err(ConfigError::InvalidOption {
                    name: "threshold".to_string(),
                    value: threshold.to_string(),
                });
            }
            let guest_selection = options.get("guest_selection").map_or("MinimumMigrationTime", |s| s.as_str());
            let host_selection = options.get("host_selection").map_or("LeastFull", |s| s.as_str());
            Ok(Box::new(StaticThresholdMigration::new(
                threshold,
                selection_policy_resolver(guest_selection)?,
                selection_policy_resolver(host_selection)?,
            )))
        }
        _ => Err(ConfigError::UnknownPolicy {
            kind: "migration policy",
            value: config_str.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::allocation_policy::{AllocationPolicy, Placement};
    use crate::core::cloudlet_scheduler::TimeSharedScheduler;
    use crate::core::common::SimulationClock;
    use crate::core::guest_scheduler::GuestSchedulerKind;
    use crate::core::pe::pe_list;
    use crate::core::selection_policy::{FirstFit, LeastFull, MinimumMigrationTime};

    fn overloaded_pool(guests: &[(u32, f64, u64)]) -> (IndexMap<HostId, Host>, GuestRegistry) {
        let mut hosts: IndexMap<HostId, Host> = (0..2)
            .map(|i| {
                let host = Host::new(
                    HostId(i),
                    pe_list(1, 1000.).unwrap(),
                    2048,
                    1000,
                    100000,
                    GuestSchedulerKind::TimeShared,
                )
                .unwrap();
                (HostId(i), host)
            })
            .collect();
        let mut registry = GuestRegistry::new();
        let mut allocation = AllocationPolicy::new(Box::new(FirstFit::new()));
        let clock = SimulationClock::new(0.);
        for (id, mips, ram) in guests.iter().copied() {
            let scheduler = Box::new(TimeSharedScheduler::new());
            let guest = registry.insert(Guest::new(GuestId(id), 0, mips, 1, ram, 10, 100, scheduler).unwrap());
            let target = Some(Placement::Host(HostId(0)));
            assert!(allocation.allocate_host_for(&mut guest.borrow_mut(), target, &mut hosts, &registry, &clock));
        }
        (hosts, registry)
    }

    fn policy(threshold: f64) -> StaticThresholdMigration {
        StaticThresholdMigration::new(
            threshold,
            Box::new(MinimumMigrationTime::new()),
            Box::new(LeastFull::new()),
        )
    }

    #[test]
    fn guest_is_moved_off_overloaded_host() {
        let (hosts, registry) = overloaded_pool(&[(0, 500., 512), (1, 500., 256)]);
        assert_eq!(hosts[&HostId(0)].utilization(), 1.);

        let proposals = policy(0.8).optimize_allocation(&hosts, &registry);
        assert_eq!(
            proposals,
            vec![MigrationProposal {
                guest: GuestId(1),
                source: HostId(0),
                target: HostId(1),
            }]
        );
    }

    #[test]
    fn guest_in_migration_is_skipped() {
        let (hosts, registry) = overloaded_pool(&[(0, 500., 512), (1, 300., 256), (2, 200., 128)]);
        registry.get(GuestId(2)).unwrap().borrow_mut().set_in_migration(true);

        let proposals = policy(0.5).optimize_allocation(&hosts, &registry);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].guest, GuestId(1));
    }

    #[test]
    fn host_under_threshold_is_left_alone() {
        let (hosts, registry) = overloaded_pool(&[(0, 500., 512), (1, 300., 256)]);
        assert!(policy(0.8).optimize_allocation(&hosts, &registry).is_empty());
        assert!(NoMigration.optimize_allocation(&hosts, &registry).is_empty());
    }

    #[test]
    fn policies_are_resolved_from_config() {
        assert!(migration_policy_resolver("NoMigration").is_ok());
        assert!(migration_policy_resolver("StaticThreshold[threshold=0.7,host_selection=MostFull]").is_ok());
        assert!(matches!(
            migration_policy_resolver("StaticThreshold[threshold=1.5]"),
            Err(ConfigError::InvalidOption { .. })
        ));
        assert!(matches!(
            migration_policy_resolver("StaticThreshold[guest_selection=Best]"),
            Err(ConfigError::UnknownPolicy { .. })
        ));
        assert!(matches!(
            migration_policy_resolver("Dynamic"),
            Err(ConfigError::UnknownPolicy { .. })
        ));
    }
}
