//! Guest (virtual machine or nested container) model.

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::cloudlet_scheduler::CloudletScheduler;
use crate::core::common::{earliest, GuestId, SimulationClock};
use crate::core::error::ConfigError;
use crate::core::guest_host::{GuestHost, GuestHostingState};
use crate::core::guest_registry::GuestRegistry;
use crate::core::guest_scheduler::GuestSchedulerKind;
use crate::core::pe::{total_mips, ProcessingElement};

/// Number of utilization samples kept for the selection policies.
pub const UTILIZATION_HISTORY_LENGTH: usize = 30;

/// Allocation state of a guest recorded after each processing update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuestStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub in_migration: bool,
}

/// Virtual machine or container running cloudlets.
///
/// A guest can also host nested guests, in which case it owns a guest scheduler dividing its virtual PEs among them.
pub struct Guest {
    id: GuestId,
    owner: u32,
    mips: f64,
    pes: u32,
    ram: u64,
    bw: u64,
    size: u64,
    cloudlet_scheduler: Box<dyn CloudletScheduler>,
    hosting: Option<GuestHostingState>,
    in_migration: bool,
    being_instantiated: bool,
    current_allocated_mips: Vec<f64>,
    current_allocated_ram: u64,
    current_allocated_bw: u64,
    state_history: Vec<GuestStateHistoryEntry>,
    utilization_history: VecDeque<f64>,
}

impl Guest {
    /// Creates guest with `pes` PEs of `mips` capacity each.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: GuestId,
        owner: u32,
        mips: f64,
        pes: u32,
        ram: u64,
        bw: u64,
        size: u64,
        cloudlet_scheduler: Box<dyn CloudletScheduler>,
    ) -> Result<Self, ConfigError> {
        if !(mips > 0.) || pes == 0 {
            return Err(ConfigError::InvalidGuestCapacity { guest: id, mips, pes });
        }
        Ok(Self {
            id,
            owner,
            mips,
            pes,
            ram,
            bw,
            size,
            cloudlet_scheduler,
            hosting: None,
            in_migration: false,
            being_instantiated: true,
            current_allocated_mips: Vec::new(),
            current_allocated_ram: 0,
            current_allocated_bw: 0,
            state_history: Vec::new(),
            utilization_history: VecDeque::new(),
        })
    }

    /// Makes the guest able to host nested guests on the given virtual PEs.
    ///
    /// The number of virtual PEs must match the declared PE count and their total capacity must not exceed the
    /// declared guest capacity.
    pub fn with_nested_guests(
        mut self,
        vpes: Vec<ProcessingElement>,
        kind: GuestSchedulerKind,
    ) -> Result<Self, ConfigError> {
        if vpes.len() != self.pes as usize {
            return Err(ConfigError::PeCountMismatch {
                guest: self.id,
                declared: self.pes,
                actual: vpes.len(),
            });
        }
        let required = total_mips(&vpes);
        if self.total_mips() < required {
            return Err(ConfigError::MipsBelowPes {
                guest: self.id,
                declared: self.total_mips(),
                required,
            });
        }
        self.hosting = Some(GuestHostingState::new(kind.build(vpes), self.ram, self.bw, self.size));
        Ok(self)
    }

    pub fn id(&self) -> GuestId {
        self.id
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Returns the capacity of a single guest PE.
    pub fn mips(&self) -> f64 {
        self.mips
    }

    pub fn pes(&self) -> u32 {
        self.pes
    }

    pub fn total_mips(&self) -> f64 {
        self.mips * self.pes as f64
    }

    pub fn ram(&self) -> u64 {
        self.ram
    }

    pub fn bw(&self) -> u64 {
        self.bw
    }

    /// Returns the storage size of the guest image.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn cloudlet_scheduler(&self) -> &dyn CloudletScheduler {
        self.cloudlet_scheduler.as_ref()
    }

    pub fn cloudlet_scheduler_mut(&mut self) -> &mut dyn CloudletScheduler {
        self.cloudlet_scheduler.as_mut()
    }

    pub fn in_migration(&self) -> bool {
        self.in_migration
    }

    pub(crate) fn set_in_migration(&mut self, in_migration: bool) {
        self.in_migration = in_migration;
    }

    /// Returns true until the guest gets its first allocation.
    pub fn is_being_instantiated(&self) -> bool {
        self.being_instantiated
    }

    pub(crate) fn set_being_instantiated(&mut self, being_instantiated: bool) {
        self.being_instantiated = being_instantiated;
    }

    /// Returns MIPS requested for each guest PE.
    ///
    /// A guest which is being instantiated or migrated requests its full capacity, otherwise the request is defined
    /// by its cloudlet scheduler.
    pub fn current_requested_mips(&self) -> Vec<f64> {
        let full = vec![self.mips; self.pes as usize];
        if self.being_instantiated || self.in_migration {
            return full;
        }
        self.cloudlet_scheduler.current_requested_mips().unwrap_or(full)
    }

    pub fn current_requested_total_mips(&self) -> f64 {
        self.current_requested_mips().iter().sum()
    }

    pub fn current_requested_ram(&self) -> u64 {
        self.ram
    }

    pub fn current_requested_bw(&self) -> u64 {
        self.bw
    }

    pub fn current_allocated_mips(&self) -> &[f64] {
        &self.current_allocated_mips
    }

    pub fn current_allocated_total_mips(&self) -> f64 {
        self.current_allocated_mips.iter().sum()
    }

    pub fn current_allocated_ram(&self) -> u64 {
        self.current_allocated_ram
    }

    pub fn current_allocated_bw(&self) -> u64 {
        self.current_allocated_bw
    }

    pub(crate) fn set_current_allocation(&mut self, mips: Vec<f64>, ram: u64, bw: u64) {
        self.current_allocated_mips = mips;
        self.current_allocated_ram = ram;
        self.current_allocated_bw = bw;
    }

    pub(crate) fn set_current_allocated_mips(&mut self, mips: Vec<f64>) {
        self.current_allocated_mips = mips;
    }

    /// Returns the CPU utilization of cloudlets in MIPS.
    pub fn total_utilization_of_cpu_mips(&self, time: f64) -> f64 {
        self.cloudlet_scheduler.total_utilization_of_cpu(time).min(1.) * self.total_mips()
    }

    pub fn state_history(&self) -> &[GuestStateHistoryEntry] {
        &self.state_history
    }

    /// Records allocation state, an entry with the same time replaces the previous one.
    pub(crate) fn add_state_history_entry(&mut self, entry: GuestStateHistoryEntry) {
        if let Some(last) = self.state_history.last_mut() {
            if last.time == entry.time {
                *last = entry;
                return;
            }
        }
        self.state_history.push(entry);
    }

    /// Returns recent CPU utilization samples (fraction of the guest capacity), oldest first.
    pub fn utilization_history(&self) -> &VecDeque<f64> {
        &self.utilization_history
    }

    pub(crate) fn record_utilization(&mut self, utilization: f64) {
        self.utilization_history.push_back(utilization);
        if self.utilization_history.len() > UTILIZATION_HISTORY_LENGTH {
            self.utilization_history.pop_front();
        }
    }

    /// Advances cloudlets and nested guests. Returns the earliest next event of both.
    pub fn update_processing(
        &mut self,
        clock: &SimulationClock,
        mips_share: &[f64],
        registry: &GuestRegistry,
    ) -> Option<f64> {
        let next_event = self.cloudlet_scheduler.update_processing(clock, mips_share);
        if self.hosting.is_none() {
            return next_event;
        }
        earliest(next_event, self.update_guests_processing(clock, registry))
    }
}

impl GuestHost for Guest {
    fn label(&self) -> String {
        self.id.to_string()
    }

    fn hosting(&self) -> Option<&GuestHostingState> {
        self.hosting.as_ref()
    }

    fn hosting_mut(&mut self) -> Option<&mut GuestHostingState> {
        self.hosting.as_mut()
    }

    fn is_instantiated(&self) -> bool {
        !self.being_instantiated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cloudlet_scheduler::TimeSharedScheduler;
    use crate::core::pe::pe_list;

    fn guest(mips: f64, pes: u32) -> Guest {
        Guest::new(GuestId(0), 0, mips, pes, 1024, 100, 1000, Box::new(TimeSharedScheduler::new())).unwrap()
    }

    #[test]
    fn nested_pe_list_must_match_declaration() {
        let result = guest(1000., 2).with_nested_guests(pe_list(3, 100.).unwrap(), GuestSchedulerKind::TimeShared);
        assert!(matches!(result, Err(ConfigError::PeCountMismatch { actual: 3, .. })));

        let result = guest(1000., 2).with_nested_guests(pe_list(2, 1500.).unwrap(), GuestSchedulerKind::TimeShared);
        assert!(matches!(result, Err(ConfigError::MipsBelowPes { .. })));

        let result = guest(1000., 2).with_nested_guests(pe_list(2, 1000.).unwrap(), GuestSchedulerKind::SpaceShared);
        assert!(result.is_ok());
    }

    #[test]
    fn invalid_capacity_is_rejected() {
        let result = Guest::new(GuestId(1), 0, 0., 1, 0, 0, 0, Box::new(TimeSharedScheduler::new()));
        assert!(matches!(result, Err(ConfigError::InvalidGuestCapacity { .. })));
    }

    #[test]
    fn guest_requests_full_capacity_until_instantiated() {
        let mut g = guest(500., 2);
        assert_eq!(g.current_requested_mips(), vec![500., 500.]);
        g.set_being_instantiated(false);
        assert_eq!(g.current_requested_total_mips(), 1000.);
    }

    #[test]
    fn history_entry_with_same_time_replaces_previous() {
        let mut g = guest(500., 1);
        for allocated_mips in [100., 200.] {
            g.add_state_history_entry(GuestStateHistoryEntry {
                time: 1.,
                allocated_mips,
                requested_mips: 500.,
                in_migration: false,
            });
        }
        assert_eq!(g.state_history().len(), 1);
        assert_eq!(g.state_history()[0].allocated_mips, 200.);
    }
}
