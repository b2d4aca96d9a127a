//! Random policy.

use std::collections::BTreeSet;

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::core::guest::Guest;
use crate::core::selection_policy::{eligible, Selectable, SelectionPolicy};

/// Uses a random suitable candidate. Selections are reproducible for the same seed.
pub struct RandomSelection {
    rand: Pcg64,
}

impl RandomSelection {
    pub fn new(seed: u64) -> Self {
        Self {
            rand: Pcg64::seed_from_u64(seed),
        }
    }
}

impl<T: Selectable> SelectionPolicy<T> for RandomSelection {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        eligible(candidates, requester, excluded)
            .choose(&mut self.rand)
            .copied()
    }
}
