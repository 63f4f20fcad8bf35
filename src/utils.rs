//! Miscellaneous utilities shared across the registration engine.
//!
//! Rotation and translation extraction from homogeneous matrices, the 2D
//! rotation embedding that lets one quaternion code path serve both
//! dimensionalities, and a small seedable wrapper around `rand` so sampling
//! stages stay reproducible in tests.

use nalgebra::{DVector, Matrix3, RealField, Rotation3, UnitQuaternion};
use rand::prelude::*;

use crate::types::TransformationParameters;

/// Extract the rotation block of a homogeneous transformation as a 3x3
/// matrix.
///
/// A 4x4 input yields its top-left 3x3 block; a 3x3 (2D) input has its 2x2
/// rotation embedded into an identity-padded 3x3 matrix, so downstream
/// quaternion math is uniform across dimensionalities.
pub fn rotation_part<T: RealField + Copy>(parameters: &TransformationParameters<T>) -> Matrix3<T> {
    let mut rotation = Matrix3::identity();
    let d = if parameters.nrows() == 4 { 3 } else { 2 };
    for i in 0..d {
        for j in 0..d {
            rotation[(i, j)] = parameters[(i, j)];
        }
    }
    rotation
}

/// Rotation component of a homogeneous transformation as a unit quaternion.
pub fn rotation_quaternion<T: RealField + Copy>(
    parameters: &TransformationParameters<T>,
) -> UnitQuaternion<T> {
    let rotation = Rotation3::from_matrix_unchecked(rotation_part(parameters));
    UnitQuaternion::from_rotation_matrix(&rotation)
}

/// Translation component of a homogeneous transformation: the leading `d`
/// entries of the rightmost column.
pub fn translation_part<T: RealField + Copy>(
    parameters: &TransformationParameters<T>,
) -> DVector<T> {
    let d = parameters.nrows() - 1;
    let mut translation = DVector::zeros(d);
    for i in 0..d {
        translation[i] = parameters[(i, parameters.ncols() - 1)];
    }
    translation
}

/// NaN is the only value that differs from itself.
pub fn is_nan<T: RealField>(value: T) -> bool {
    value != value
}

/// Lossy conversion to `f64`, used when interfacing with `f64`-only spatial
/// indices.
pub(crate) fn to_f64<T: RealField>(value: T) -> f64 {
    value.to_subset_unchecked()
}

/// Bernoulli sampler over a `StdRng`.
///
/// By default this uses a randomly seeded RNG, but test code can construct
/// it from a fixed seed for reproducible behavior.
pub struct SamplingRng {
    rng: StdRng,
}

impl Default for SamplingRng {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplingRng {
    /// Construct with a random seed (suitable for production use).
    pub fn new() -> Self {
        let rng = StdRng::from_rng(thread_rng()).expect("failed to seed StdRng");
        Self { rng }
    }

    /// Construct with a fixed seed (useful for tests).
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw once, keeping with probability `prob`.
    pub fn keep(&mut self, prob: f64) -> bool {
        self.rng.gen::<f64>() < prob
    }
}
