//! Least Full policy.

use std::collections::BTreeSet;

use crate::core::guest::Guest;
use crate::core::selection_policy::{eligible, Selectable, SelectionPolicy};

/// Uses the suitable candidate with the lowest utilization.
#[derive(Default)]
pub struct LeastFull;

impl LeastFull {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<T: Selectable> SelectionPolicy<T> for LeastFull {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        let mut result: Option<&'a T> = None;
        let mut min_utilization = f64::INFINITY;
        for candidate in eligible(candidates, requester, excluded) {
            let utilization = candidate.utilization();
            if utilization < min_utilization {
                min_utilization = utilization;
                result = Some(candidate);
            }
        }
        result
    }
}
