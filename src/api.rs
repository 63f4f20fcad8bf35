//! High-level registration API.
//!
//! These functions assemble a sensible default pipeline from
//! [`IcpSettings`] and run the driver once: kd-tree matching, the chosen
//! error metric, counter plus delta-error convergence checking. Callers
//! wanting custom stage compositions should build an
//! [`IcpStrategy`](crate::core::IcpStrategy) themselves and call
//! [`icp`](crate::core::icp) directly.

use std::cell::Cell;
use std::rc::Rc;

use nalgebra::RealField;

use crate::checkers::{CounterTransformationChecker, ErrorTransformationChecker};
use crate::core::{
    icp, DataPointsFilters, ErrorMinimizer, FeatureOutlierFilters, IcpStrategy,
    TransformationCheckers, Transformations,
};
use crate::error::Result;
use crate::filters::{RandomSamplingFilter, SurfaceNormalsFilter};
use crate::inspectors::CountingInspector;
use crate::matchers::KdTreeMatcher;
use crate::minimizers::{PointToPlaneMinimizer, PointToPointMinimizer};
use crate::outliers::NullDescriptorOutlierFilter;
use crate::settings::IcpSettings;
use crate::transforms::FeatureTransform;
use crate::types::{DataPoints, TransformationParameters};

/// Outcome of a registration run.
#[derive(Debug, Clone)]
pub struct AlignmentResult<T: RealField> {
    /// Rigid transformation aligning the reading onto the reference, in the
    /// original reference frame.
    pub transformation: TransformationParameters<T>,
    /// Number of iterations performed.
    pub iterations: usize,
}

fn default_strategy<T: RealField + Copy>(
    settings: &IcpSettings<T>,
    error_minimizer: Box<dyn ErrorMinimizer<T>>,
    reference_filters: DataPointsFilters<T>,
) -> (IcpStrategy<T>, Rc<Cell<usize>>) {
    let mut reading_filters = DataPointsFilters::new();
    if settings.sampling_prob < 1.0 {
        reading_filters.push(Box::new(RandomSamplingFilter::new(settings.sampling_prob)));
    }

    let mut transformations = Transformations::new();
    transformations.push(Box::new(FeatureTransform::new()));

    let mut transformation_checkers = TransformationCheckers::new();
    transformation_checkers.push(Box::new(CounterTransformationChecker::new(
        settings.max_iterations,
    )));
    transformation_checkers.push(Box::new(ErrorTransformationChecker::new(
        settings.min_delta_rot_err,
        settings.min_delta_trans_err,
        settings.tail,
    )));

    let inspector = CountingInspector::new();
    let iterations = inspector.handle();

    let strategy = IcpStrategy {
        reading_filters,
        reference_filters,
        transformations,
        matcher: Box::new(KdTreeMatcher::with_knn(settings.knn)),
        feature_outlier_filters: FeatureOutlierFilters::new(),
        descriptor_outlier_filter: Box::new(NullDescriptorOutlierFilter::new()),
        outlier_mixing_weight: settings.outlier_mixing_weight,
        error_minimizer,
        transformation_checkers,
        inspector: Box::new(inspector),
    };

    (strategy, iterations)
}

/// Register `reading` onto `reference` under the point-to-point metric.
pub fn align_point_to_point<T: RealField + Copy>(
    reading: &DataPoints<T>,
    reference: &DataPoints<T>,
    initial_parameters: &TransformationParameters<T>,
    settings: &IcpSettings<T>,
) -> Result<AlignmentResult<T>> {
    let (mut strategy, iterations) = default_strategy(
        settings,
        Box::new(PointToPointMinimizer::new()),
        DataPointsFilters::new(),
    );

    let transformation = icp(
        initial_parameters,
        reading.clone(),
        reference.clone(),
        &mut strategy,
    )?;

    Ok(AlignmentResult {
        transformation,
        iterations: iterations.get(),
    })
}

/// Register `reading` onto `reference` under the point-to-plane metric.
///
/// Reference surface normals are estimated from `settings.normal_k` nearest
/// neighbors during pre-filtering.
pub fn align_point_to_plane<T: RealField + Copy>(
    reading: &DataPoints<T>,
    reference: &DataPoints<T>,
    initial_parameters: &TransformationParameters<T>,
    settings: &IcpSettings<T>,
) -> Result<AlignmentResult<T>> {
    let mut reference_filters = DataPointsFilters::new();
    reference_filters.push(Box::new(SurfaceNormalsFilter::new(settings.normal_k)));

    let (mut strategy, iterations) = default_strategy(
        settings,
        Box::new(PointToPlaneMinimizer::new()),
        reference_filters,
    );

    let transformation = icp(
        initial_parameters,
        reading.clone(),
        reference.clone(),
        &mut strategy,
    )?;

    Ok(AlignmentResult {
        transformation,
        iterations: iterations.get(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn cloud3(points: &[[f64; 3]]) -> DataPoints<f64> {
        let mut features = DMatrix::from_element(4, points.len(), 1.0);
        for (j, p) in points.iter().enumerate() {
            features[(0, j)] = p[0];
            features[(1, j)] = p[1];
            features[(2, j)] = p[2];
        }
        DataPoints::from_features(features)
    }

    fn translated(cloud: &DataPoints<f64>, t: [f64; 3]) -> DataPoints<f64> {
        let mut out = cloud.clone();
        for j in 0..out.point_count() {
            for r in 0..3 {
                out.features[(r, j)] += t[r];
            }
        }
        out
    }

    #[test]
    fn point_to_point_api_recovers_translation() {
        let reading = cloud3(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]);
        let t = [0.05, 0.1, -0.05];
        let reference = translated(&reading, t);

        let initial = DMatrix::<f64>::identity(4, 4);
        let settings = IcpSettings::default();
        let result = align_point_to_point(&reading, &reference, &initial, &settings).unwrap();

        assert!(result.iterations > 0);
        assert!(result.iterations <= settings.max_iterations);
        for r in 0..3 {
            assert_relative_eq!(result.transformation[(r, 3)], t[r], epsilon = 1e-9);
        }
    }

    #[test]
    fn point_to_plane_api_recovers_translation() {
        // Three orthogonal faces, sampled away from their shared corner so
        // every normal-estimation neighborhood stays coplanar.
        let mut points = Vec::new();
        let ticks = [1.0, 1.5, 2.0, 2.5];
        for &a in &ticks {
            for &b in &ticks {
                points.push([a, b, 0.0]);
                points.push([0.0, a, b]);
                points.push([a, 0.0, b]);
            }
        }
        let reading = cloud3(&points);
        let t = [0.02, -0.01, 0.03];
        let reference = translated(&reading, t);

        let initial = DMatrix::<f64>::identity(4, 4);
        let settings = IcpSettings::default();
        let result = align_point_to_plane(&reading, &reference, &initial, &settings).unwrap();

        assert!(result.iterations > 0);
        for r in 0..3 {
            assert_relative_eq!(result.transformation[(r, 3)], t[r], epsilon = 1e-6);
        }
    }
}
