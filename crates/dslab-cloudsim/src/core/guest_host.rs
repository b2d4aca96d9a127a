//! Capability of hosting guests, shared by physical hosts and guests with nested guests.

use crate::core::common::{earliest, GuestId, SimulationClock};
use crate::core::guest::{Guest, GuestStateHistoryEntry};
use crate::core::guest_registry::GuestRegistry;
use crate::core::guest_scheduler::{GuestRef, GuestScheduler, MIPS_EPS};
use crate::core::provisioner::ResourceProvisioner;
use crate::{log_debug, log_trace, log_warn};

/// Resources of an entity hosting guests and the guests placed on it.
pub struct GuestHostingState {
    pub(crate) scheduler: Box<dyn GuestScheduler>,
    pub(crate) ram: ResourceProvisioner,
    pub(crate) bw: ResourceProvisioner,
    pub(crate) storage: u64,
    pub(crate) storage_available: u64,
    pub(crate) guests: Vec<GuestId>,
    pub(crate) migrating_in: Vec<GuestId>,
}

impl GuestHostingState {
    pub fn new(scheduler: Box<dyn GuestScheduler>, ram: u64, bw: u64, storage: u64) -> Self {
        Self {
            scheduler,
            ram: ResourceProvisioner::new(ram),
            bw: ResourceProvisioner::new(bw),
            storage,
            storage_available: storage,
            guests: Vec::new(),
            migrating_in: Vec::new(),
        }
    }

    pub fn scheduler(&self) -> &dyn GuestScheduler {
        self.scheduler.as_ref()
    }

    pub fn ram(&self) -> &ResourceProvisioner {
        &self.ram
    }

    pub fn bw(&self) -> &ResourceProvisioner {
        &self.bw
    }

    pub fn storage(&self) -> u64 {
        self.storage
    }

    pub fn storage_available(&self) -> u64 {
        self.storage_available
    }

    /// Returns guests placed on this entity.
    pub fn guests(&self) -> &[GuestId] {
        &self.guests
    }

    /// Returns guests migrating into this entity.
    pub fn migrating_in(&self) -> &[GuestId] {
        &self.migrating_in
    }

    fn reserve(&mut self, guest: &Guest) -> Result<(), &'static str> {
        if self.storage_available < guest.size() {
            return Err("storage");
        }
        if !self.ram.allocate(guest.id(), guest.current_requested_ram()) {
            return Err("RAM");
        }
        if !self.bw.allocate(guest.id(), guest.current_requested_bw()) {
            self.ram.deallocate(guest.id());
            return Err("bandwidth");
        }
        Ok(())
    }

    fn release(&mut self, guest: &Guest) {
        self.scheduler.deallocate_pes_for_guest(guest.id());
        self.ram.deallocate(guest.id());
        self.bw.deallocate(guest.id());
        self.storage_available = (self.storage_available + guest.size()).min(self.storage);
    }
}

/// Entity which can host guests: a physical host or a guest with nested guests.
pub trait GuestHost {
    /// Returns the name used in logs.
    fn label(&self) -> String;

    /// Returns the hosting state or `None` if the entity can't host guests.
    fn hosting(&self) -> Option<&GuestHostingState>;

    fn hosting_mut(&mut self) -> Option<&mut GuestHostingState>;

    fn is_failed(&self) -> bool {
        false
    }

    /// Returns false while the entity itself is not yet allocated.
    fn is_instantiated(&self) -> bool {
        true
    }

    /// Called after resident guests are processed with the total allocated and requested MIPS.
    fn on_guests_processed(&mut self, _clock: &SimulationClock, _allocated_mips: f64, _requested_mips: f64) {}

    /// Checks whether the guest with its current demand can be placed here.
    fn is_suitable_for_guest(&self, guest: &Guest) -> bool {
        if self.is_failed() {
            return false;
        }
        match self.hosting() {
            Some(hosting) => {
                hosting.storage_available >= guest.size()
                    && hosting.ram.is_suitable_for(guest.id(), guest.current_requested_ram())
                    && hosting.bw.is_suitable_for(guest.id(), guest.current_requested_bw())
                    && hosting.scheduler.is_suitable_for(&guest.current_requested_mips())
            }
            None => false,
        }
    }

    /// Places the guest here. Returns false without changing anything if there are not enough resources.
    fn guest_create(&mut self, guest: &mut Guest, clock: &SimulationClock) -> bool {
        if self.is_failed() {
            return false;
        }
        let label = self.label();
        let hosting = match self.hosting_mut() {
            Some(hosting) => hosting,
            None => return false,
        };
        if let Err(resource) = hosting.reserve(guest) {
            log_warn!(clock, label, "can't create {}: not enough {}", guest.id(), resource);
            return false;
        }
        let requested = guest.current_requested_mips();
        if !hosting
            .scheduler
            .allocate_pes_for_guest(GuestRef::new(guest.id(), guest.in_migration()), &requested)
        {
            hosting.ram.deallocate(guest.id());
            hosting.bw.deallocate(guest.id());
            log_warn!(clock, label, "can't create {}: not enough MIPS", guest.id());
            return false;
        }
        hosting.storage_available -= guest.size();
        if !hosting.guests.contains(&guest.id()) {
            hosting.guests.push(guest.id());
        }
        let allocated = hosting.scheduler.allocated_mips_for(guest.id()).to_vec();
        guest.set_current_allocation(
            allocated,
            hosting.ram.allocated_for(guest.id()),
            hosting.bw.allocated_for(guest.id()),
        );
        log_debug!(clock, label, "created {}", guest.id());
        true
    }

    /// Removes the guest and releases its resources. Returns false if the guest is not placed here.
    fn guest_destroy(&mut self, guest: &mut Guest, clock: &SimulationClock) -> bool {
        let label = self.label();
        let hosting = match self.hosting_mut() {
            Some(hosting) => hosting,
            None => return false,
        };
        let pos = match hosting.guests.iter().position(|id| *id == guest.id()) {
            Some(pos) => pos,
            None => return false,
        };
        hosting.guests.remove(pos);
        hosting.release(guest);
        guest.set_current_allocation(Vec::new(), 0, 0);
        log_debug!(clock, label, "destroyed {}", guest.id());
        true
    }

    /// Reserves resources for a guest migrating here and marks the guest as being in migration.
    ///
    /// The guest gets only a fraction of its demand here until the migration is committed.
    fn add_migrating_in_guest(&mut self, guest: &mut Guest, clock: &SimulationClock) -> bool {
        if self.is_failed() {
            return false;
        }
        let label = self.label();
        let hosting = match self.hosting_mut() {
            Some(hosting) => hosting,
            None => return false,
        };
        if hosting.migrating_in.contains(&guest.id()) || hosting.guests.contains(&guest.id()) {
            return false;
        }
        if let Err(resource) = hosting.reserve(guest) {
            log_warn!(clock, label, "can't accept migrating {}: not enough {}", guest.id(), resource);
            return false;
        }
        hosting.scheduler.add_migrating_in(guest.id());
        let was_in_migration = guest.in_migration();
        guest.set_in_migration(true);
        let requested = guest.current_requested_mips();
        if !hosting
            .scheduler
            .allocate_pes_for_guest(GuestRef::new(guest.id(), true), &requested)
        {
            hosting.scheduler.remove_migrating_in(guest.id());
            hosting.ram.deallocate(guest.id());
            hosting.bw.deallocate(guest.id());
            guest.set_in_migration(was_in_migration);
            log_warn!(clock, label, "can't accept migrating {}: not enough MIPS", guest.id());
            return false;
        }
        hosting.storage_available -= guest.size();
        hosting.migrating_in.push(guest.id());
        log_debug!(clock, label, "reserved resources for migrating {}", guest.id());
        true
    }

    /// Drops the migrating-in reservation of the guest and clears its migration flag.
    fn remove_migrating_in_guest(&mut self, guest: &mut Guest) -> bool {
        let hosting = match self.hosting_mut() {
            Some(hosting) => hosting,
            None => return false,
        };
        let pos = match hosting.migrating_in.iter().position(|id| *id == guest.id()) {
            Some(pos) => pos,
            None => return false,
        };
        hosting.migrating_in.remove(pos);
        hosting.release(guest);
        hosting.scheduler.remove_migrating_in(guest.id());
        guest.set_in_migration(false);
        true
    }

    /// Reallocates capacity among guests according to their current demand and advances resident guests.
    ///
    /// All guests (including the ones migrating in) are deallocated and allocated again before any guest is advanced,
    /// so that every guest is processed with a share computed from the same state. Guests migrating in are only
    /// reserved here, they are processed on their source. Returns the earliest next event of resident guests.
    ///
    /// A failed entity processes nothing.
    fn update_guests_processing(&mut self, clock: &SimulationClock, registry: &GuestRegistry) -> Option<f64> {
        if self.is_failed() {
            return None;
        }
        let label = self.label();
        let hosting = match self.hosting_mut() {
            Some(hosting) => hosting,
            None => return None,
        };

        hosting.scheduler.deallocate_pes_for_all_guests();
        for id in hosting.guests.iter().chain(hosting.migrating_in.iter()) {
            let guest = match registry.get(*id) {
                Some(guest) => guest.borrow(),
                None => continue,
            };
            let requested = guest.current_requested_mips();
            if !hosting
                .scheduler
                .allocate_pes_for_guest(GuestRef::new(*id, guest.in_migration()), &requested)
            {
                log_warn!(clock, label, "can't reallocate MIPS for {}", id);
            }
        }
        if hosting.scheduler.is_oversubscribed() {
            log_debug!(clock, label, "demand exceeds capacity, allocations are scaled down");
        }

        let mut next_event = None;
        let mut allocated_total = 0.;
        let mut requested_total = 0.;
        for id in hosting.guests.iter() {
            let mut guest = match registry.get(*id) {
                Some(guest) => guest.borrow_mut(),
                None => continue,
            };
            let allocated = hosting.scheduler.allocated_mips_for(*id).to_vec();
            let allocated_mips: f64 = allocated.iter().sum();
            let requested_mips = guest.current_requested_total_mips();
            guest.set_current_allocated_mips(allocated.clone());
            next_event = earliest(next_event, guest.update_processing(clock, &allocated, registry));

            let in_migration = guest.in_migration();
            guest.add_state_history_entry(GuestStateHistoryEntry {
                time: clock.time(),
                allocated_mips,
                requested_mips,
                in_migration,
            });
            let utilization = guest.total_utilization_of_cpu_mips(clock.time()) / guest.total_mips();
            guest.record_utilization(utilization);
            if allocated_mips + MIPS_EPS < requested_mips {
                log_trace!(
                    clock,
                    label,
                    "under-allocated MIPS for {}: requested {:.2}, allocated {:.2}",
                    id,
                    requested_mips,
                    allocated_mips
                );
            }
            allocated_total += allocated_mips;
            requested_total += requested_mips;
        }

        self.on_guests_processed(clock, allocated_total, requested_total);
        next_event
    }
}
