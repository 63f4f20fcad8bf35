//! Configuration for the high-level registration entry points.

use nalgebra::{convert, RealField};

/// Knobs for the default pipeline assembled by [`crate::api`].
///
/// Callers needing full control over stage composition should build an
/// [`IcpStrategy`](crate::core::IcpStrategy) directly instead.
#[derive(Debug, Clone, PartialEq)]
pub struct IcpSettings<T: RealField> {
    /// Hard cap on loop iterations (counter checker).
    pub max_iterations: usize,
    /// Mean rotation step below which the loop is converged (delta checker).
    pub min_delta_rot_err: T,
    /// Mean translation step below which the loop is converged (delta checker).
    pub min_delta_trans_err: T,
    /// Smoothing window of the delta checker.
    pub tail: usize,
    /// Blend between feature and descriptor outlier weights, in `[0, 1]`.
    pub outlier_mixing_weight: T,
    /// Neighbors requested per reading point.
    pub knn: usize,
    /// Keep probability of the per-iteration reading subsample; `1.0`
    /// disables subsampling.
    pub sampling_prob: f64,
    /// Neighborhood size for reference normal estimation (point-to-plane
    /// pipelines only).
    pub normal_k: usize,
}

impl<T: RealField + Copy> Default for IcpSettings<T> {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            min_delta_rot_err: convert(1e-4),
            min_delta_trans_err: convert(1e-4),
            tail: 3,
            outlier_mixing_weight: T::one(),
            knn: 1,
            sampling_prob: 1.0,
            normal_k: 6,
        }
    }
}
