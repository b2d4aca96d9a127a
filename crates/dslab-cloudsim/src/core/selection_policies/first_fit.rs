//! First Fit policy.

use std::collections::BTreeSet;

use crate::core::guest::Guest;
use crate::core::selection_policy::{Selectable, SelectionPolicy};

/// Uses the first suitable candidate.
#[derive(Default)]
pub struct FirstFit;

impl FirstFit {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<T: Selectable> SelectionPolicy<T> for FirstFit {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        candidates
            .iter()
            .copied()
            .filter(|c| !excluded.contains(&c.selection_id()))
            .find(|c| requester.map_or(true, |guest| c.is_suitable_for(guest)))
    }
}
