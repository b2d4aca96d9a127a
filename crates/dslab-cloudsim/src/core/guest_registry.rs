//! Owning table of guests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use sugars::{rc, refcell};

use crate::core::common::GuestId;
use crate::core::guest::Guest;

/// Owns all guests of a datacenter, hosts and nested guest hosts refer to guests by ID.
#[derive(Default)]
pub struct GuestRegistry {
    guests: BTreeMap<GuestId, Rc<RefCell<Guest>>>,
}

impl GuestRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds guest to the registry, replacing a guest with the same ID.
    pub fn insert(&mut self, guest: Guest) -> Rc<RefCell<Guest>> {
        let guest = rc!(refcell!(guest));
        self.guests.insert(guest.borrow().id(), guest.clone());
        guest
    }

    pub fn get(&self, id: GuestId) -> Option<&Rc<RefCell<Guest>>> {
        self.guests.get(&id)
    }

    pub fn remove(&mut self, id: GuestId) -> Option<Rc<RefCell<Guest>>> {
        self.guests.remove(&id)
    }

    pub fn contains(&self, id: GuestId) -> bool {
        self.guests.contains_key(&id)
    }

    /// Returns IDs of all guests in ascending order.
    pub fn ids(&self) -> Vec<GuestId> {
        self.guests.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GuestId, &Rc<RefCell<Guest>>)> {
        self.guests.iter()
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }
}
