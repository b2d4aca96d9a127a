//! Maximum Correlation policy.

use std::collections::BTreeSet;

use crate::core::guest::Guest;
use crate::core::selection_policies::maximum_usage::MaximumUsage;
use crate::core::selection_policy::{eligible, Selectable, SelectionPolicy};

/// Minimum number of utilization samples needed to compute correlations.
pub const MIN_HISTORY_LENGTH: usize = 3;

/// Uses the candidate whose utilization history is the most correlated with the total utilization of other candidates.
///
/// Migrating such a candidate lowers the probability of simultaneous utilization peaks. Falls back to
/// [`MaximumUsage`] if there is not enough history or the correlation is undefined.
#[derive(Default)]
pub struct MaximumCorrelation {
    fallback: MaximumUsage,
}

impl MaximumCorrelation {
    pub fn new() -> Self {
        Default::default()
    }
}

/// Computes Pearson correlation coefficient, returns `None` if one of the samples is constant.
pub fn correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.;
    let mut var_x = 0.;
    let mut var_y = 0.;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0. || var_y <= 0. {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

impl MaximumCorrelation {
    fn select_fallback<'a, T: Selectable>(&mut self, eligible: &[&'a T], excluded: &BTreeSet<T::Id>) -> Option<&'a T> {
        SelectionPolicy::<T>::select(&mut self.fallback, eligible, None, excluded)
    }
}

impl<T: Selectable> SelectionPolicy<T> for MaximumCorrelation {
    fn select<'a>(
        &mut self,
        candidates: &[&'a T],
        requester: Option<&Guest>,
        excluded: &BTreeSet<T::Id>,
    ) -> Option<&'a T> {
        let eligible = eligible(candidates, requester, excluded);
        let histories: Vec<Vec<f64>> = eligible.iter().map(|c| c.utilization_history()).collect();
        let length = histories.iter().map(|h| h.len()).min().unwrap_or(0);
        if eligible.len() < 2 || length < MIN_HISTORY_LENGTH {
            return self.select_fallback(&eligible, excluded);
        }

        // use the latest `length` samples of each history
        let aligned: Vec<&[f64]> = histories.iter().map(|h| &h[h.len() - length..]).collect();
        let mut result: Option<&'a T> = None;
        let mut max_correlation = f64::NEG_INFINITY;
        for (i, candidate) in eligible.iter().enumerate() {
            let others: Vec<f64> = (0..length)
                .map(|k| {
                    aligned
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, h)| h[k])
                        .sum::<f64>()
                })
                .collect();
            if let Some(value) = correlation(aligned[i], &others) {
                if value > max_correlation {
                    max_correlation = value;
                    result = Some(*candidate);
                }
            }
        }
        if result.is_none() {
            return self.select_fallback(&eligible, excluded);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_of_linear_samples() {
        let x = [1., 2., 3., 4.];
        assert!((correlation(&x, &[2., 4., 6., 8.]).unwrap() - 1.).abs() < 1e-12);
        assert!((correlation(&x, &[8., 6., 4., 2.]).unwrap() + 1.).abs() < 1e-12);
        assert_eq!(correlation(&x, &[1., 1., 1., 1.]), None);
    }
}
