//! Time-shared guest scheduler.

use crate::core::common::GuestId;
use crate::core::guest_scheduler::{GuestRef, GuestScheduler, PeAllocationTable, MIGRATING_IN_FACTOR};
use crate::core::pe::ProcessingElement;

/// Defines how requests exceeding the host capacity are handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityRule {
    /// Requests exceeding the capacity of a PE or the available capacity of the host are rejected.
    Strict,
    /// Per-PE requests are capped at the PE capacity, and when the host capacity is exceeded all guests get the same
    /// fraction of their demand.
    Oversubscription,
}

/// Guest PEs share the host PEs, so that several guests can be placed on a single PE.
///
/// A guest migrating out of the host gets 90% of its demand, a guest migrating into the host gets 10% of its demand
/// until the migration is committed.
pub struct TimeSharedGuestScheduler {
    table: PeAllocationTable,
    rule: CapacityRule,
}

impl TimeSharedGuestScheduler {
    pub fn new(pes: Vec<ProcessingElement>) -> Self {
        Self {
            table: PeAllocationTable::new(pes),
            rule: CapacityRule::Strict,
        }
    }

    pub fn with_oversubscription(pes: Vec<ProcessingElement>) -> Self {
        Self {
            table: PeAllocationTable::new(pes),
            rule: CapacityRule::Oversubscription,
        }
    }

    pub fn rule(&self) -> CapacityRule {
        self.rule
    }

    fn allocate_requested(&mut self, guest: GuestId, mips_share: &[f64]) -> bool {
        match self.rule {
            CapacityRule::Strict => self.allocate_strict(guest, mips_share),
            CapacityRule::Oversubscription => {
                self.allocate_oversubscribed(guest, mips_share);
                true
            }
        }
    }

    fn allocate_strict(&mut self, guest: GuestId, mips_share: &[f64]) -> bool {
        let pe_capacity = self.table.pe_capacity();
        if mips_share.iter().any(|mips| *mips > pe_capacity) {
            return false;
        }
        let total: f64 = mips_share.iter().sum();
        if total > self.table.available_mips {
            return false;
        }
        self.table.requested.insert(guest, mips_share.to_vec());
        self.grant(guest, mips_share, total);
        true
    }

    fn allocate_oversubscribed(&mut self, guest: GuestId, mips_share: &[f64]) {
        let capped = self.capped(mips_share);
        let total: f64 = capped.iter().sum();
        self.table.requested.insert(guest, mips_share.to_vec());
        let reserved = if self.table.migrating_in.contains(&guest) {
            total * MIGRATING_IN_FACTOR
        } else {
            total
        };
        if reserved <= self.table.available_mips {
            self.grant(guest, &capped, total);
        } else {
            self.redistribute();
        }
    }

    /// Records allocation of `mips_share` adjusted by the migration factor.
    fn grant(&mut self, guest: GuestId, mips_share: &[f64], total: f64) {
        let factor = self.table.migration_factor(guest);
        let reserved = if self.table.migrating_in.contains(&guest) {
            total * MIGRATING_IN_FACTOR
        } else {
            total
        };
        let allocated = mips_share.iter().map(|mips| mips * factor).collect();
        self.table.allocated.insert(guest, allocated);
        self.table.available_mips = (self.table.available_mips - reserved).max(0.);
    }

    fn capped(&self, mips_share: &[f64]) -> Vec<f64> {
        let pe_capacity = self.table.pe_capacity();
        mips_share.iter().map(|mips| mips.min(pe_capacity)).collect()
    }

    /// Scales down the capped demand of all guests so that it fits into the host capacity.
    fn redistribute(&mut self) {
        let mut required_total = 0.;
        let mut capped_requests = Vec::new();
        for (guest, mips_share) in self.table.requested.iter() {
            let capped = self.capped(mips_share);
            let mut required: f64 = capped.iter().sum();
            if self.table.migrating_in.contains(guest) {
                required *= MIGRATING_IN_FACTOR;
            }
            required_total += required;
            capped_requests.push((*guest, capped));
        }

        let total_mips = self.total_mips();
        let scale = if required_total > 0. {
            (total_mips / required_total).min(1.)
        } else {
            1.
        };

        self.table.allocated.clear();
        for (guest, capped) in capped_requests {
            let factor = self.table.migration_factor(guest);
            let allocated = capped.iter().map(|mips| (mips * factor * scale).floor()).collect();
            self.table.allocated.insert(guest, allocated);
        }
        self.table.available_mips = 0.;
        self.table.oversubscribed = true;
    }
}

impl GuestScheduler for TimeSharedGuestScheduler {
    fn allocate_pes_for_guest(&mut self, guest: GuestRef, mips_share: &[f64]) -> bool {
        if self.table.requested.contains_key(&guest.id) {
            self.deallocate_pes_for_guest(guest.id);
        }
        self.table.track_migration(guest);
        let result = self.allocate_requested(guest.id, mips_share);
        self.table.update_pe_provisioning();
        result
    }

    /// Releases the guest and allocates the remaining guests again, so that capacity taken from them because of
    /// oversubscription is returned.
    fn deallocate_pes_for_guest(&mut self, guest: GuestId) {
        self.table.migrating_out.remove(&guest);
        if self.table.requested.remove(&guest).is_none() {
            return;
        }
        self.table.reset();
        let remaining: Vec<(GuestId, Vec<f64>)> = std::mem::take(&mut self.table.requested).into_iter().collect();
        for (other, mips_share) in remaining {
            self.allocate_requested(other, &mips_share);
        }
        self.table.update_pe_provisioning();
    }

    fn table(&self) -> &PeAllocationTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut PeAllocationTable {
        &mut self.table
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    use super::*;
    use crate::core::pe::pe_list;

    fn guest(id: u32) -> GuestRef {
        GuestRef::new(GuestId(id), false)
    }

    #[test]
    fn strict_scheduler_rejects_excess_demand() {
        let mut scheduler = TimeSharedGuestScheduler::new(pe_list(2, 1000.).unwrap());
        assert!(!scheduler.allocate_pes_for_guest(guest(0), &[1500.]));
        assert!(scheduler.allocate_pes_for_guest(guest(0), &[1000., 500.]));
        assert_eq!(scheduler.available_mips(), 500.);
        assert!(!scheduler.allocate_pes_for_guest(guest(1), &[600.]));
        assert!(scheduler.allocated_mips_for(GuestId(1)).is_empty());
        assert!(scheduler.allocate_pes_for_guest(guest(1), &[500.]));
        assert_eq!(scheduler.available_mips(), 0.);
        assert_eq!(scheduler.max_available_mips(), 0.);
    }

    #[test]
    fn deallocation_is_idempotent() {
        let mut scheduler = TimeSharedGuestScheduler::new(pe_list(2, 1000.).unwrap());
        scheduler.allocate_pes_for_guest(guest(0), &[1000.]);
        scheduler.allocate_pes_for_guest(guest(1), &[500.]);
        scheduler.deallocate_pes_for_guest(GuestId(0));
        assert_eq!(scheduler.available_mips(), 1500.);
        scheduler.deallocate_pes_for_guest(GuestId(0));
        assert_eq!(scheduler.available_mips(), 1500.);
        assert_eq!(scheduler.allocated_mips_for(GuestId(1)), &[500.]);
        scheduler.deallocate_pes_for_guest(GuestId(7));
        assert_eq!(scheduler.available_mips(), 1500.);
    }

    #[test]
    fn allocations_are_packed_onto_pes() {
        let mut scheduler = TimeSharedGuestScheduler::new(pe_list(2, 1000.).unwrap());
        scheduler.allocate_pes_for_guest(guest(0), &[600.]);
        scheduler.allocate_pes_for_guest(guest(1), &[600.]);
        assert_eq!(scheduler.pe_usage(), &[1000., 200.]);
        assert_eq!(scheduler.pes_of(GuestId(1)).len(), 2);
        assert_eq!(scheduler.free_pe_count(), 0);
    }

    #[test]
    fn migrating_guests_are_degraded() {
        let mut source = TimeSharedGuestScheduler::new(pe_list(1, 1000.).unwrap());
        assert!(source.allocate_pes_for_guest(GuestRef::new(GuestId(0), true), &[1000.]));
        assert!(source.is_migrating_out(GuestId(0)));
        assert_eq!(source.allocated_mips_for(GuestId(0)), &[900.]);
        source.deallocate_pes_for_guest(GuestId(0));
        assert!(!source.is_migrating_out(GuestId(0)));

        let mut target = TimeSharedGuestScheduler::new(pe_list(1, 1000.).unwrap());
        target.add_migrating_in(GuestId(0));
        assert!(target.allocate_pes_for_guest(GuestRef::new(GuestId(0), true), &[1000.]));
        assert!(!target.is_migrating_out(GuestId(0)));
        assert_eq!(target.allocated_mips_for(GuestId(0)), &[100.]);
        assert_eq!(target.available_mips(), 900.);

        target.remove_migrating_in(GuestId(0));
        target.deallocate_pes_for_guest(GuestId(0));
        assert!(target.allocate_pes_for_guest(guest(0), &[1000.]));
        assert_eq!(target.allocated_mips_for(GuestId(0)), &[1000.]);
    }

    #[test]
    fn oversubscription_caps_and_scales_demand() {
        let mut scheduler = TimeSharedGuestScheduler::with_oversubscription(pe_list(2, 1000.).unwrap());
        assert!(scheduler.allocate_pes_for_guest(guest(0), &[1500.]));
        assert_eq!(scheduler.allocated_mips_for(GuestId(0)), &[1000.]);
        assert!(!scheduler.is_oversubscribed());

        assert!(scheduler.allocate_pes_for_guest(guest(1), &[1000., 1000.]));
        assert!(scheduler.is_oversubscribed());
        // 3000 MIPS are required in total, the host has 2000 MIPS
        assert_eq!(scheduler.allocated_mips_for(GuestId(0)), &[666.]);
        assert_eq!(scheduler.allocated_mips_for(GuestId(1)), &[666., 666.]);
        assert_eq!(scheduler.available_mips(), 0.);
        for (pe, usage) in scheduler.pes().iter().zip(scheduler.pe_usage()) {
            assert!(*usage <= pe.mips());
        }

        scheduler.deallocate_pes_for_guest(GuestId(0));
        assert!(!scheduler.is_oversubscribed());
        assert_eq!(scheduler.allocated_mips_for(GuestId(1)), &[1000., 1000.]);
    }

    #[test]
    fn deallocation_of_all_guests_keeps_migrating_in() {
        let mut scheduler = TimeSharedGuestScheduler::new(pe_list(1, 1000.).unwrap());
        scheduler.add_migrating_in(GuestId(3));
        scheduler.allocate_pes_for_guest(GuestRef::new(GuestId(3), true), &[500.]);
        scheduler.deallocate_pes_for_all_guests();
        assert!(scheduler.is_migrating_in(GuestId(3)));
        assert_eq!(scheduler.available_mips(), 1000.);
        assert!(scheduler.guests().is_empty());
    }

    #[test]
    fn allocations_never_exceed_capacity() {
        let schedulers = vec![
            TimeSharedGuestScheduler::new(pe_list(4, 1000.).unwrap()),
            TimeSharedGuestScheduler::with_oversubscription(pe_list(4, 1000.).unwrap()),
        ];
        for mut scheduler in schedulers {
            let mut rand = Pcg64::seed_from_u64(123);
            for _ in 0..1000 {
                let id = GuestId(rand.gen_range(0..8));
                if scheduler.guests().contains(&id) {
                    scheduler.deallocate_pes_for_guest(id);
                } else {
                    let pes = rand.gen_range(1..=3);
                    let share: Vec<f64> = (0..pes).map(|_| rand.gen_range(100..=1200) as f64).collect();
                    scheduler.allocate_pes_for_guest(GuestRef::new(id, false), &share);
                }

                let allocated: f64 = scheduler
                    .guests()
                    .iter()
                    .map(|guest| scheduler.total_allocated_mips_for(*guest))
                    .sum();
                assert!(allocated <= 4000. + 1e-6);
                assert!(scheduler.available_mips() >= -1e-6);
                for usage in scheduler.pe_usage() {
                    assert!(*usage <= 1000. + 1e-6);
                }
                if scheduler.rule() == CapacityRule::Strict {
                    assert!((allocated + scheduler.available_mips() - 4000.).abs() < 1e-6);
                }
            }
        }
    }
}
