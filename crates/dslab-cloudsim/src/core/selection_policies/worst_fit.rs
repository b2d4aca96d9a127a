//! Worst Fit policy.

use std::collections::BTreeSet;

use crate::core::guest::Guest;
use crate::core::selection_policy::{eligible, Selectable, SelectionPolicy};

/// Uses the suitable candidate with the largest number of free PEs.
#[derive(Default)]
pub struct WorstFit;

impl WorstFit {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<T: Selectable> SelectionPolicy<T> for WorstFit {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        let mut result: Option<&'a T> = None;
        let mut max_free_pes = 0;
        for candidate in eligible(candidates, requester, excluded) {
            if result.is_none() || candidate.free_pe_count() > max_free_pes {
                max_free_pes = candidate.free_pe_count();
                result = Some(candidate);
            }
        }
        result
    }
}
