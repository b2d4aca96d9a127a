//! Guest schedulers dividing PEs of a host among its guests.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::Serialize;

use crate::core::common::{GuestId, PeId};
use crate::core::error::ConfigError;
use crate::core::pe::{free_pe_count, total_mips, PeStatus, ProcessingElement};

pub use crate::core::guest_schedulers::space_shared::SpaceSharedGuestScheduler;
pub use crate::core::guest_schedulers::time_shared::{CapacityRule, TimeSharedGuestScheduler};

/// Share of the requested MIPS granted to a guest migrating out of the host.
pub const MIGRATING_OUT_FACTOR: f64 = 0.9;
/// Share of the requested MIPS granted to a guest migrating into the host.
pub const MIGRATING_IN_FACTOR: f64 = 0.1;

pub(crate) const MIPS_EPS: f64 = 1e-9;

/// Guest as seen by a guest scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuestRef {
    pub id: GuestId,
    pub in_migration: bool,
}

impl GuestRef {
    pub fn new(id: GuestId, in_migration: bool) -> Self {
        Self { id, in_migration }
    }
}

/// Trait for implementation of guest schedulers.
///
/// A guest scheduler receives the MIPS requested by each guest PE and decides how much of the host capacity the guest
/// actually gets. The allocations of all guests are re-evaluated on each tick: the host deallocates all guests and
/// allocates them again with their current demand.
pub trait GuestScheduler {
    /// Tries to grant the requested MIPS (one value per guest PE) to the guest.
    /// Returns false if the request can't be satisfied, in which case nothing is allocated.
    fn allocate_pes_for_guest(&mut self, guest: GuestRef, mips_share: &[f64]) -> bool;

    /// Releases the capacity held by the guest. Does nothing if the guest has no allocation.
    fn deallocate_pes_for_guest(&mut self, guest: GuestId);

    fn table(&self) -> &PeAllocationTable;

    fn table_mut(&mut self) -> &mut PeAllocationTable;

    /// Checks whether the request could be allocated now without changing the scheduler state.
    fn is_suitable_for(&self, mips_share: &[f64]) -> bool {
        let table = self.table();
        let max_requested = mips_share.iter().cloned().fold(0., f64::max);
        let total_requested: f64 = mips_share.iter().sum();
        max_requested <= table.pe_capacity() && total_requested <= table.available_mips + MIPS_EPS
    }

    /// Returns true if the last allocation had to scale down the demand of guests.
    fn is_oversubscribed(&self) -> bool {
        self.table().oversubscribed
    }

    /// Releases the capacity held by all guests. Migrating-in reservations are kept as guests to be allocated again.
    fn deallocate_pes_for_all_guests(&mut self) {
        let table = self.table_mut();
        table.requested.clear();
        table.reset();
    }

    /// Returns MIPS granted to each guest PE, empty if the guest has no allocation.
    fn allocated_mips_for(&self, guest: GuestId) -> &[f64] {
        self.table().allocated.get(&guest).map_or(&[], |mips| mips.as_slice())
    }

    fn total_allocated_mips_for(&self, guest: GuestId) -> f64 {
        self.allocated_mips_for(guest).iter().sum()
    }

    /// Returns MIPS requested by the guest in the last allocation.
    fn requested_mips_for(&self, guest: GuestId) -> &[f64] {
        self.table().requested.get(&guest).map_or(&[], |mips| mips.as_slice())
    }

    /// Returns host PEs used by the guest.
    fn pes_of(&self, guest: GuestId) -> &[PeId] {
        self.table().pe_map.get(&guest).map_or(&[], |pes| pes.as_slice())
    }

    /// Returns the largest unallocated capacity of a single PE.
    fn max_available_mips(&self) -> f64 {
        let table = self.table();
        table
            .pes
            .iter()
            .zip(table.pe_usage.iter())
            .map(|(pe, usage)| (pe.mips() - usage).max(0.))
            .fold(0., f64::max)
    }

    fn available_mips(&self) -> f64 {
        self.table().available_mips
    }

    /// Returns the capacity of the largest PE.
    fn pe_capacity(&self) -> f64 {
        self.table().pe_capacity()
    }

    fn pes(&self) -> &[ProcessingElement] {
        &self.table().pes
    }

    /// Returns MIPS allocated on each PE.
    fn pe_usage(&self) -> &[f64] {
        &self.table().pe_usage
    }

    fn total_mips(&self) -> f64 {
        total_mips(&self.table().pes)
    }

    fn free_pe_count(&self) -> usize {
        free_pe_count(&self.table().pes)
    }

    /// Returns guests having an allocation.
    fn guests(&self) -> Vec<GuestId> {
        self.table().allocated.keys().copied().collect()
    }

    fn add_migrating_in(&mut self, guest: GuestId) {
        self.table_mut().migrating_in.insert(guest);
    }

    fn remove_migrating_in(&mut self, guest: GuestId) {
        self.table_mut().migrating_in.remove(&guest);
    }

    fn is_migrating_in(&self, guest: GuestId) -> bool {
        self.table().migrating_in.contains(&guest)
    }

    fn is_migrating_out(&self, guest: GuestId) -> bool {
        self.table().migrating_out.contains(&guest)
    }
}

/// PEs of a host together with the allocations made by its guest scheduler.
pub struct PeAllocationTable {
    pub(crate) pes: Vec<ProcessingElement>,
    pub(crate) pe_usage: Vec<f64>,
    pub(crate) available_mips: f64,
    pub(crate) requested: BTreeMap<GuestId, Vec<f64>>,
    pub(crate) allocated: BTreeMap<GuestId, Vec<f64>>,
    pub(crate) pe_map: BTreeMap<GuestId, Vec<PeId>>,
    pub(crate) migrating_in: BTreeSet<GuestId>,
    pub(crate) migrating_out: BTreeSet<GuestId>,
    pub(crate) oversubscribed: bool,
}

impl PeAllocationTable {
    pub fn new(pes: Vec<ProcessingElement>) -> Self {
        let available_mips = total_mips(&pes);
        let pe_usage = vec![0.; pes.len()];
        Self {
            pes,
            pe_usage,
            available_mips,
            requested: BTreeMap::new(),
            allocated: BTreeMap::new(),
            pe_map: BTreeMap::new(),
            migrating_in: BTreeSet::new(),
            migrating_out: BTreeSet::new(),
            oversubscribed: false,
        }
    }

    pub fn pe_capacity(&self) -> f64 {
        self.pes.iter().map(|pe| pe.mips()).fold(0., f64::max)
    }

    /// Drops all allocations keeping the requests and migration state.
    pub(crate) fn reset(&mut self) {
        self.allocated.clear();
        self.pe_map.clear();
        self.available_mips = total_mips(&self.pes);
        self.oversubscribed = false;
        for usage in self.pe_usage.iter_mut() {
            *usage = 0.;
        }
        for pe in self.pes.iter_mut() {
            pe.set_status(PeStatus::Free);
        }
    }

    /// Tracks the migrating-out state of the guest. Guests migrating into this host are never migrating out of it.
    pub(crate) fn track_migration(&mut self, guest: GuestRef) {
        if guest.in_migration {
            if !self.migrating_in.contains(&guest.id) {
                self.migrating_out.insert(guest.id);
            }
        } else {
            self.migrating_out.remove(&guest.id);
        }
    }

    /// Returns the factor applied to the demand of the guest because of its migration.
    pub(crate) fn migration_factor(&self, guest: GuestId) -> f64 {
        if self.migrating_out.contains(&guest) {
            MIGRATING_OUT_FACTOR
        } else if self.migrating_in.contains(&guest) {
            MIGRATING_IN_FACTOR
        } else {
            1.
        }
    }

    /// Maps allocations to PEs by packing them sequentially, one PE after another.
    pub(crate) fn update_pe_provisioning(&mut self) {
        self.pe_map.clear();
        for usage in self.pe_usage.iter_mut() {
            *usage = 0.;
        }
        let mut pe_index = 0;
        for (guest, mips_list) in self.allocated.iter() {
            let mut guest_pes = Vec::new();
            for mips in mips_list {
                let mut remaining = *mips;
                while remaining > MIPS_EPS && pe_index < self.pes.len() {
                    let free = self.pes[pe_index].mips() - self.pe_usage[pe_index];
                    if free <= MIPS_EPS {
                        pe_index += 1;
                        continue;
                    }
                    let amount = remaining.min(free);
                    self.pe_usage[pe_index] += amount;
                    remaining -= amount;
                    let pe_id = self.pes[pe_index].id();
                    if !guest_pes.contains(&pe_id) {
                        guest_pes.push(pe_id);
                    }
                }
            }
            self.pe_map.insert(*guest, guest_pes);
        }
        for (pe, usage) in self.pes.iter_mut().zip(self.pe_usage.iter()) {
            pe.set_status(if *usage > 0. { PeStatus::Busy } else { PeStatus::Free });
        }
    }
}

/// Available guest scheduler implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GuestSchedulerKind {
    TimeShared,
    TimeSharedOverSubscription,
    SpaceShared,
}

impl GuestSchedulerKind {
    pub fn build(&self, pes: Vec<ProcessingElement>) -> Box<dyn GuestScheduler> {
        match self {
            GuestSchedulerKind::TimeShared => Box::new(TimeSharedGuestScheduler::new(pes)),
            GuestSchedulerKind::TimeSharedOverSubscription => {
                Box::new(TimeSharedGuestScheduler::with_oversubscription(pes))
            }
            GuestSchedulerKind::SpaceShared => Box::new(SpaceSharedGuestScheduler::new(pes)),
        }
    }
}

impl FromStr for GuestSchedulerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TimeShared" => Ok(GuestSchedulerKind::TimeShared),
            "TimeSharedOverSubscription" => Ok(GuestSchedulerKind::TimeSharedOverSubscription),
            "SpaceShared" => Ok(GuestSchedulerKind::SpaceShared),
            _ => Err(ConfigError::UnknownPolicy {
                kind: "guest scheduler",
                value: s.to_string(),
            }),
        }
    }
}
