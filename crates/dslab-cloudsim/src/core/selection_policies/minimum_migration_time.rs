//! Minimum Migration Time policy.

use std::collections::BTreeSet;

use crate::core::guest::Guest;
use crate::core::selection_policy::{eligible, Selectable, SelectionPolicy};

/// Uses the candidate with the smallest RAM, which is the fastest one to migrate.
#[derive(Default)]
pub struct MinimumMigrationTime;

impl MinimumMigrationTime {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<T: Selectable> SelectionPolicy<T> for MinimumMigrationTime {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        eligible(candidates, requester, excluded)
            .into_iter()
            .min_by_key(|candidate| candidate.ram())
    }
}
