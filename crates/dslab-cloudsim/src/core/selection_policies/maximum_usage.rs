//! Maximum Usage policy.

use std::collections::BTreeSet;

use crate::core::guest::Guest;
use crate::core::selection_policy::{eligible, Selectable, SelectionPolicy};

/// Uses the candidate with the highest utilization in MIPS, e.g. to migrate the guest loading its host the most.
#[derive(Default)]
pub struct MaximumUsage;

impl MaximumUsage {
    pub fn new() -> Self {
        Default::default()
    }
}

impl<T: Selectable> SelectionPolicy<T> for MaximumUsage {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        let mut result: Option<&'a T> = None;
        let mut max_usage = f64::NEG_INFINITY;
        for candidate in eligible(candidates, requester, excluded) {
            let usage = candidate.utilization_mips();
            if usage > max_usage {
                max_usage = usage;
                result = Some(candidate);
            }
        }
        result
    }
}
