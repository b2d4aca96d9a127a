//! Most Full policy.

use std::collections::BTreeSet;

use crate::core::guest::Guest;
use crate::core::selection_policy::{eligible, Selectable, SelectionPolicy};

/// Uses the suitable candidate with the highest utilization.
#[derive(Default)]
pub struct MostFull;

impl MostFull {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<T: Selectable> SelectionPolicy<T> for MostFull {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        let mut result: Option<&'a T> = None;
        let mut max_utilization = f64::NEG_INFINITY;
        for candidate in eligible(candidates, requester, excluded) {
            let utilization = candidate.utilization();
            if utilization > max_utilization {
                max_utilization = utilization;
                result = Some(candidate);
            }
        }
        result
    }
}
