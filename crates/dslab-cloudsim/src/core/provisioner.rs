//! Provisioners of RAM and bandwidth.

use std::collections::BTreeMap;

use crate::core::common::GuestId;

/// Tracks the allocation of a single scalar resource (RAM or bandwidth) among guests.
#[derive(Clone, Debug)]
pub struct ResourceProvisioner {
    capacity: u64,
    available: u64,
    allocations: BTreeMap<GuestId, u64>,
}

impl ResourceProvisioner {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            available: capacity,
            allocations: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn used(&self) -> u64 {
        self.capacity - self.available
    }

    /// Returns the amount allocated to the guest.
    pub fn allocated_for(&self, guest: GuestId) -> u64 {
        self.allocations.get(&guest).copied().unwrap_or(0)
    }

    /// Checks whether the guest can get the specified amount, taking into account its current allocation.
    pub fn is_suitable_for(&self, guest: GuestId, amount: u64) -> bool {
        self.available + self.allocated_for(guest) >= amount
    }

    /// Allocates the amount to the guest replacing its previous allocation. Returns false if there is not enough
    /// resource, in which case the previous allocation is kept.
    pub fn allocate(&mut self, guest: GuestId, amount: u64) -> bool {
        if !self.is_suitable_for(guest, amount) {
            return false;
        }
        self.deallocate(guest);
        self.available -= amount;
        self.allocations.insert(guest, amount);
        true
    }

    /// Releases the allocation of the guest, does nothing if there is no allocation.
    pub fn deallocate(&mut self, guest: GuestId) {
        if let Some(amount) = self.allocations.remove(&guest) {
            self.available += amount;
        }
    }

    pub fn deallocate_all(&mut self) {
        self.allocations.clear();
        self.available = self.capacity;
    }
}
