//! Geometric transformations applied to clouds.

use nalgebra::RealField;

use crate::core::Transformation;
use crate::types::{DataPoints, TransformationParameters};

/// Multiplies the homogeneous feature block by the transformation.
///
/// Descriptors pass through untouched; direction-like descriptors (normals)
/// attached to the *reading* would need their own rotation stage, but the
/// pipeline only consumes reference normals, which the driver never
/// transforms.
pub struct FeatureTransform;

impl Default for FeatureTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureTransform {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> Transformation<T> for FeatureTransform {
    fn compute(
        &self,
        cloud: DataPoints<T>,
        parameters: &TransformationParameters<T>,
    ) -> DataPoints<T> {
        debug_assert_eq!(parameters.nrows(), cloud.features.nrows());
        debug_assert_eq!(parameters.nrows(), parameters.ncols());
        DataPoints::new(parameters * cloud.features, cloud.descriptors)
    }
}
