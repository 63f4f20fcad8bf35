//! Outlier filters: per-correspondence weighting.
//!
//! Feature-outlier filters judge correspondences on geometric evidence
//! (match distances); the descriptor-outlier filter does the same on
//! descriptor evidence. Weights are in `[0, 1]` and the driver blends the
//! two families with its mixing weight. Remember that match distances are
//! squared, so thresholds are squared before comparison.

use std::cmp::Ordering;

use nalgebra::RealField;

use crate::core::{DescriptorOutlierFilter, FeatureOutlierFilter};
use crate::types::{DataPoints, Matches, OutlierWeights};

/// Accepts every correspondence at full weight.
pub struct NullFeatureOutlierFilter;

impl Default for NullFeatureOutlierFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl NullFeatureOutlierFilter {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> FeatureOutlierFilter<T> for NullFeatureOutlierFilter {
    fn compute(
        &mut self,
        _filtered_reading: &DataPoints<T>,
        _filtered_reference: &DataPoints<T>,
        matches: &Matches<T>,
        _iterate: &mut bool,
    ) -> OutlierWeights<T> {
        OutlierWeights::from_element(matches.knn(), matches.point_count(), T::one())
    }
}

/// Rejects correspondences farther than a fixed distance.
pub struct MaxDistOutlierFilter<T> {
    max_dist: T,
}

impl<T: RealField + Copy> MaxDistOutlierFilter<T> {
    /// `max_dist` is a plain (non-squared) distance.
    pub fn new(max_dist: T) -> Self {
        debug_assert!(max_dist > T::zero());
        Self { max_dist }
    }
}

impl<T: RealField + Copy> FeatureOutlierFilter<T> for MaxDistOutlierFilter<T> {
    fn compute(
        &mut self,
        _filtered_reading: &DataPoints<T>,
        _filtered_reference: &DataPoints<T>,
        matches: &Matches<T>,
        _iterate: &mut bool,
    ) -> OutlierWeights<T> {
        let threshold = self.max_dist * self.max_dist;
        OutlierWeights::from_fn(matches.knn(), matches.point_count(), |i, j| {
            if matches.dists[(i, j)] <= threshold {
                T::one()
            } else {
                T::zero()
            }
        })
    }
}

/// Rejects correspondences farther than `factor` times the median match
/// distance of the current iteration.
pub struct MedianDistOutlierFilter<T> {
    factor: T,
}

impl<T: RealField + Copy> MedianDistOutlierFilter<T> {
    pub fn new(factor: T) -> Self {
        debug_assert!(factor > T::zero());
        Self { factor }
    }
}

impl<T: RealField + Copy> FeatureOutlierFilter<T> for MedianDistOutlierFilter<T> {
    fn compute(
        &mut self,
        _filtered_reading: &DataPoints<T>,
        _filtered_reference: &DataPoints<T>,
        matches: &Matches<T>,
        _iterate: &mut bool,
    ) -> OutlierWeights<T> {
        let mut dists: Vec<T> = matches.dists.iter().copied().collect();
        if dists.is_empty() {
            return OutlierWeights::from_element(matches.knn(), matches.point_count(), T::one());
        }
        dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let median = dists[dists.len() / 2];

        // Distances are squared, so the factor is squared as well.
        let threshold = self.factor * self.factor * median;
        OutlierWeights::from_fn(matches.knn(), matches.point_count(), |i, j| {
            if matches.dists[(i, j)] <= threshold {
                T::one()
            } else {
                T::zero()
            }
        })
    }
}

/// Accepts every correspondence at full weight; the default required
/// descriptor stage when no descriptor evidence is available.
pub struct NullDescriptorOutlierFilter;

impl Default for NullDescriptorOutlierFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDescriptorOutlierFilter {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> DescriptorOutlierFilter<T> for NullDescriptorOutlierFilter {
    fn compute(
        &mut self,
        _filtered_reading: &DataPoints<T>,
        _filtered_reference: &DataPoints<T>,
        matches: &Matches<T>,
        _iterate: &mut bool,
    ) -> OutlierWeights<T> {
        OutlierWeights::from_element(matches.knn(), matches.point_count(), T::one())
    }
}
