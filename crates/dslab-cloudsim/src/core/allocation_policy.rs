//! Guest allocation policy.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use serde::Serialize;

use crate::core::common::{GuestId, HostId, SimulationClock};
use crate::core::guest::Guest;
use crate::core::guest_host::GuestHost;
use crate::core::guest_registry::GuestRegistry;
use crate::core::host::Host;
use crate::core::selection_policy::SelectionPolicy;
use crate::{log_debug, log_warn};

const POLICY_NAME: &str = "allocation-policy";

/// Entity hosting a guest: a physical host or a guest with nested guests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Placement {
    Host(HostId),
    Guest(GuestId),
}

impl Display for Placement {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Placement::Host(id) => write!(f, "{}", id),
            Placement::Guest(id) => write!(f, "{}", id),
        }
    }
}

/// Places guests on hosts using the host selection policy and keeps track of guest placements.
pub struct AllocationPolicy {
    selection: Box<dyn SelectionPolicy<Host>>,
    table: BTreeMap<GuestId, Placement>,
}

impl AllocationPolicy {
    pub fn new(selection: Box<dyn SelectionPolicy<Host>>) -> Self {
        Self {
            selection,
            table: BTreeMap::new(),
        }
    }

    /// Returns the current placement of the guest.
    pub fn placement_of(&self, guest: GuestId) -> Option<Placement> {
        self.table.get(&guest).copied()
    }

    /// Returns the physical host of the guest, following nested placements.
    pub fn host_of(&self, guest: GuestId) -> Option<HostId> {
        let mut current = guest;
        let mut visited = BTreeSet::new();
        loop {
            if !visited.insert(current) {
                return None;
            }
            match self.table.get(&current)? {
                Placement::Host(host) => return Some(*host),
                Placement::Guest(parent) => current = *parent,
            }
        }
    }

    pub fn table(&self) -> &BTreeMap<GuestId, Placement> {
        &self.table
    }

    /// Finds a suitable host for the guest.
    ///
    /// The selected host is checked for suitability and excluded if it can't accommodate the guest, the number of
    /// attempts is bounded by the number of hosts.
    pub fn find_host_for(&mut self, guest: &Guest, hosts: &IndexMap<HostId, Host>) -> Option<HostId> {
        let candidates: Vec<&Host> = hosts.values().collect();
        let mut excluded = BTreeSet::new();
        for _ in 0..candidates.len() {
            let host = self.selection.select(&candidates, Some(guest), &excluded)?;
            if host.is_suitable_for_guest(guest) {
                return Some(host.id());
            }
            excluded.insert(host.id());
        }
        None
    }

    /// Places the guest on the target or, if the target is not specified, on the host found by the selection policy.
    ///
    /// Returns false without changing anything if the guest is already placed, the target is the guest itself, the
    /// target guest is not instantiated yet or the target can't accommodate the guest.
    pub fn allocate_host_for(
        &mut self,
        guest: &mut Guest,
        target: Option<Placement>,
        hosts: &mut IndexMap<HostId, Host>,
        registry: &GuestRegistry,
        clock: &SimulationClock,
    ) -> bool {
        if let Some(placement) = self.table.get(&guest.id()) {
            log_warn!(clock, POLICY_NAME, "{} is already placed on {}", guest.id(), placement);
            return false;
        }
        let target = match target {
            Some(target) => target,
            None => match self.find_host_for(guest, hosts) {
                Some(host) => Placement::Host(host),
                None => {
                    log_warn!(clock, POLICY_NAME, "no suitable host for {}", guest.id());
                    return false;
                }
            },
        };
        let created = match target {
            Placement::Host(id) => match hosts.get_mut(&id) {
                Some(host) => host.guest_create(guest, clock),
                None => false,
            },
            Placement::Guest(id) => {
                if id == guest.id() {
                    log_warn!(clock, POLICY_NAME, "{} can't host itself", guest.id());
                    return false;
                }
                match registry.get(id) {
                    Some(parent) => {
                        let mut parent = parent.borrow_mut();
                        if !parent.is_instantiated() {
                            log_warn!(clock, POLICY_NAME, "{} is not instantiated yet", id);
                            false
                        } else {
                            parent.guest_create(guest, clock)
                        }
                    }
                    None => false,
                }
            }
        };
        if created {
            self.table.insert(guest.id(), target);
            guest.set_being_instantiated(false);
            log_debug!(clock, POLICY_NAME, "placed {} on {}", guest.id(), target);
        }
        created
    }

    /// Removes the guest from its placement and releases its resources. Returns false if the guest is not placed.
    pub fn deallocate_host_for(
        &mut self,
        guest: &mut Guest,
        hosts: &mut IndexMap<HostId, Host>,
        registry: &GuestRegistry,
        clock: &SimulationClock,
    ) -> bool {
        let placement = match self.table.remove(&guest.id()) {
            Some(placement) => placement,
            None => return false,
        };
        match placement {
            Placement::Host(id) => {
                if let Some(host) = hosts.get_mut(&id) {
                    host.guest_destroy(guest, clock);
                }
            }
            Placement::Guest(id) => {
                if let Some(parent) = registry.get(id) {
                    parent.borrow_mut().guest_destroy(guest, clock);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cloudlet_scheduler::TimeSharedScheduler;
    use crate::core::guest_scheduler::{GuestScheduler, GuestSchedulerKind};
    use crate::core::pe::pe_list;
    use crate::core::selection_policy::FirstFit;

    fn hosts(count: u32, pes: u32) -> IndexMap<HostId, Host> {
        (0..count)
            .map(|i| {
                let host = Host::new(
                    HostId(i),
                    pe_list(pes, 1000.).unwrap(),
                    2048,
                    1000,
                    100000,
                    GuestSchedulerKind::TimeShared,
                )
                .unwrap();
                (HostId(i), host)
            })
            .collect()
    }

    fn guest(id: u32, pes: u32) -> Guest {
        Guest::new(GuestId(id), 0, 1000., pes, 1024, 100, 1000, Box::new(TimeSharedScheduler::new())).unwrap()
    }

    #[test]
    fn guest_is_placed_on_first_suitable_host() {
        let mut hosts = hosts(2, 2);
        let registry = GuestRegistry::new();
        let clock = SimulationClock::new(0.);
        let mut policy = AllocationPolicy::new(Box::new(FirstFit::new()));

        let mut g0 = guest(0, 2);
        assert!(policy.allocate_host_for(&mut g0, None, &mut hosts, &registry, &clock));
        assert_eq!(policy.placement_of(GuestId(0)), Some(Placement::Host(HostId(0))));
        assert!(!g0.is_being_instantiated());

        let mut g1 = guest(1, 1);
        assert!(policy.allocate_host_for(&mut g1, None, &mut hosts, &registry, &clock));
        assert_eq!(policy.host_of(GuestId(1)), Some(HostId(1)));

        // already placed
        assert!(!policy.allocate_host_for(&mut g1, None, &mut hosts, &registry, &clock));
    }

    #[test]
    fn failed_allocation_changes_nothing() {
        let mut hosts = hosts(1, 1);
        let registry = GuestRegistry::new();
        let clock = SimulationClock::new(0.);
        let mut policy = AllocationPolicy::new(Box::new(FirstFit::new()));

        let mut g = guest(0, 2);
        assert!(policy.find_host_for(&g, &hosts).is_none());
        assert!(!policy.allocate_host_for(&mut g, None, &mut hosts, &registry, &clock));
        assert!(policy.table().is_empty());
        assert!(g.is_being_instantiated());
        assert_eq!(hosts[&HostId(0)].state().ram().available(), 2048);
    }

    #[test]
    fn deallocation_is_noop_for_unplaced_guest() {
        let mut hosts = hosts(1, 2);
        let registry = GuestRegistry::new();
        let clock = SimulationClock::new(0.);
        let mut policy = AllocationPolicy::new(Box::new(FirstFit::new()));
        let target = Some(Placement::Host(HostId(0)));

        let mut g = guest(0, 1);
        assert!(!policy.deallocate_host_for(&mut g, &mut hosts, &registry, &clock));
        assert!(policy.allocate_host_for(&mut g, target, &mut hosts, &registry, &clock));
        assert!(policy.deallocate_host_for(&mut g, &mut hosts, &registry, &clock));
        assert!(!policy.deallocate_host_for(&mut g, &mut hosts, &registry, &clock));
        assert_eq!(hosts[&HostId(0)].scheduler().available_mips(), 2000.);
        assert!(hosts[&HostId(0)].state().guests().is_empty());
    }

    #[test]
    fn nested_guest_needs_placed_parent() {
        let mut hosts = hosts(1, 2);
        let mut registry = GuestRegistry::new();
        let clock = SimulationClock::new(0.);
        let mut policy = AllocationPolicy::new(Box::new(FirstFit::new()));

        let parent = guest(0, 2)
            .with_nested_guests(pe_list(2, 1000.).unwrap(), GuestSchedulerKind::TimeShared)
            .unwrap();
        let parent = registry.insert(parent);
        let nested = Some(Placement::Guest(GuestId(0)));

        // self-hosting
        assert!(!policy.allocate_host_for(&mut parent.borrow_mut(), nested, &mut hosts, &registry, &clock));

        let mut child = guest(1, 1);
        assert!(!policy.allocate_host_for(&mut child, nested, &mut hosts, &registry, &clock));

        assert!(policy.allocate_host_for(&mut parent.borrow_mut(), None, &mut hosts, &registry, &clock));
        assert!(policy.allocate_host_for(&mut child, nested, &mut hosts, &registry, &clock));
        assert_eq!(policy.host_of(GuestId(1)), Some(HostId(0)));
        assert_eq!(parent.borrow().hosting().unwrap().guests(), &[GuestId(1)]);
    }
}
