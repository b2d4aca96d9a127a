//! Space-shared guest scheduler.

use crate::core::common::GuestId;
use crate::core::guest_scheduler::{GuestRef, GuestScheduler, PeAllocationTable};
use crate::core::pe::{PeStatus, ProcessingElement};

/// Each guest PE gets a dedicated host PE.
///
/// A request is granted only if every requested PE can be placed on a free host PE with enough capacity. Guests get
/// exactly what they request, migration doesn't degrade the allocation.
pub struct SpaceSharedGuestScheduler {
    table: PeAllocationTable,
}

impl SpaceSharedGuestScheduler {
    pub fn new(pes: Vec<ProcessingElement>) -> Self {
        Self {
            table: PeAllocationTable::new(pes),
        }
    }

    /// Returns indices of host PEs selected for the request or `None` if there are not enough suitable free PEs.
    fn select_pes(&self, mips_share: &[f64]) -> Option<Vec<usize>> {
        let mut selected: Vec<usize> = Vec::with_capacity(mips_share.len());
        for mips in mips_share {
            let index = self
                .table
                .pes
                .iter()
                .enumerate()
                .position(|(i, pe)| pe.is_free() && !selected.contains(&i) && pe.mips() >= *mips)?;
            selected.push(index);
        }
        Some(selected)
    }
}

impl GuestScheduler for SpaceSharedGuestScheduler {
    fn allocate_pes_for_guest(&mut self, guest: GuestRef, mips_share: &[f64]) -> bool {
        self.deallocate_pes_for_guest(guest.id);
        self.table.track_migration(guest);
        let selected = match self.select_pes(mips_share) {
            Some(selected) => selected,
            None => return false,
        };

        let mut pe_ids = Vec::with_capacity(selected.len());
        for index in selected {
            let pe = &mut self.table.pes[index];
            pe.set_status(PeStatus::Busy);
            pe_ids.push(pe.id());
            self.table.pe_usage[index] = pe.mips();
        }
        let total: f64 = mips_share.iter().sum();
        self.table.available_mips = (self.table.available_mips - total).max(0.);
        self.table.requested.insert(guest.id, mips_share.to_vec());
        self.table.allocated.insert(guest.id, mips_share.to_vec());
        self.table.pe_map.insert(guest.id, pe_ids);
        true
    }

    fn deallocate_pes_for_guest(&mut self, guest: GuestId) {
        self.table.requested.remove(&guest);
        self.table.migrating_out.remove(&guest);
        if let Some(mips_share) = self.table.allocated.remove(&guest) {
            let total: f64 = mips_share.iter().sum();
            self.table.available_mips += total;
        }
        if let Some(pe_ids) = self.table.pe_map.remove(&guest) {
            for (pe, usage) in self.table.pes.iter_mut().zip(self.table.pe_usage.iter_mut()) {
                if pe_ids.contains(&pe.id()) {
                    pe.set_status(PeStatus::Free);
                    *usage = 0.;
                }
            }
        }
    }

    fn is_suitable_for(&self, mips_share: &[f64]) -> bool {
        self.select_pes(mips_share).is_some()
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
    use super::*;
    use crate::core::common::PeId;
    use crate::core::pe::pe_list;

    #[test]
    fn allocation_is_all_or_nothing() {
        let mut scheduler = SpaceSharedGuestScheduler::new(pe_list(2, 1000.).unwrap());
        assert!(scheduler.allocate_pes_for_guest(GuestRef::new(GuestId(0), false), &[500.]));
        assert_eq!(scheduler.pes_of(GuestId(0)), &[PeId(0)]);
        assert_eq!(scheduler.free_pe_count(), 1);

        assert!(!scheduler.is_suitable_for(&[500., 500.]));
        assert!(!scheduler.allocate_pes_for_guest(GuestRef::new(GuestId(1), false), &[500., 500.]));
        assert_eq!(scheduler.free_pe_count(), 1);
        assert!(scheduler.allocated_mips_for(GuestId(1)).is_empty());

        assert!(scheduler.allocate_pes_for_guest(GuestRef::new(GuestId(1), false), &[1000.]));
        assert_eq!(scheduler.pes_of(GuestId(1)), &[PeId(1)]);
        assert_eq!(scheduler.available_mips(), 500.);
    }

    #[test]
    fn reallocation_reuses_own_pes() {
        let mut scheduler = SpaceSharedGuestScheduler::new(pe_list(1, 1000.).unwrap());
        let guest = GuestRef::new(GuestId(0), false);
        assert!(scheduler.allocate_pes_for_guest(guest, &[800.]));
        assert!(scheduler.allocate_pes_for_guest(guest, &[900.]));
        assert_eq!(scheduler.allocated_mips_for(GuestId(0)), &[900.]);
        assert_eq!(scheduler.available_mips(), 100.);
    }

    #[test]
    fn migration_does_not_degrade_allocation() {
        let mut scheduler = SpaceSharedGuestScheduler::new(pe_list(1, 1000.).unwrap());
        assert!(scheduler.allocate_pes_for_guest(GuestRef::new(GuestId(0), true), &[1000.]));
        assert_eq!(scheduler.allocated_mips_for(GuestId(0)), &[1000.]);
        scheduler.deallocate_pes_for_guest(GuestId(0));
        scheduler.deallocate_pes_for_guest(GuestId(0));
        assert_eq!(scheduler.available_mips(), 1000.);
        assert_eq!(scheduler.free_pe_count(), 1);
    }
}
