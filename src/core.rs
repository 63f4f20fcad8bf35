//! Stage contracts and the ICP driver.
//!
//! The engine is expressed as a set of capability traits (filters, matcher,
//! outlier weighting, error minimization, convergence checking, inspection),
//! ordered collections that fan out over them, and a single `icp` driver
//! that composes a strategy bundle into the iteration loop. Concrete stages
//! live in sibling modules; anything implementing the traits below can be
//! slotted in.

use std::time::Instant;

use log::debug;
use nalgebra::{DVector, RealField};

use crate::error::{AlignError, Result};
use crate::types::{DataPoints, Matches, OutlierWeights, TransformationParameters};

/// Cloud filter with distinct once-at-setup and once-per-iteration hooks.
///
/// Filters consume the current cloud and yield its replacement; they may
/// shrink the column count or decorate descriptors, but must keep feature
/// and descriptor columns aligned and leave the homogeneous row untouched.
/// `iterate` may be cleared only to force early termination on malformed
/// input.
pub trait DataPointsFilter<T: RealField + Copy> {
    /// Filter applied once, before the iteration loop.
    fn pre_filter(&mut self, cloud: DataPoints<T>, iterate: &mut bool) -> DataPoints<T>;

    /// Filter applied to the per-iteration working copies.
    fn step_filter(&mut self, cloud: DataPoints<T>, iterate: &mut bool) -> DataPoints<T>;
}

/// Geometric application of a transformation to a cloud, typically the
/// homogeneous multiplication of its feature block.
pub trait Transformation<T: RealField + Copy> {
    fn compute(
        &self,
        cloud: DataPoints<T>,
        parameters: &TransformationParameters<T>,
    ) -> DataPoints<T>;
}

/// Nearest-neighbor search between the step clouds.
pub trait Matcher<T: RealField + Copy> {
    /// Build acceleration structures over the pre-filtered clouds. Called
    /// once per driver invocation; `find_closests` is called every
    /// iteration against the same reference.
    fn init(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        iterate: &mut bool,
    );

    /// Match every reading column to its nearest reference columns. The
    /// returned `ids` and `dists` must have identical shape.
    fn find_closests(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        iterate: &mut bool,
    ) -> Matches<T>;
}

/// Correspondence weighting from feature-space evidence (distances,
/// geometry). Output shape must equal the shape of `matches.ids`.
pub trait FeatureOutlierFilter<T: RealField + Copy> {
    fn compute(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        matches: &Matches<T>,
        iterate: &mut bool,
    ) -> OutlierWeights<T>;
}

/// Correspondence weighting from descriptor-space evidence (normals,
/// colors). Output shape must equal the shape of `matches.ids`.
pub trait DescriptorOutlierFilter<T: RealField + Copy> {
    fn compute(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        matches: &Matches<T>,
        iterate: &mut bool,
    ) -> OutlierWeights<T>;
}

/// Local correction solver: from weighted correspondences to a rigid
/// transformation increment in homogeneous form (bottom row `(0, ..., 1)`).
pub trait ErrorMinimizer<T: RealField + Copy> {
    fn compute(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        outlier_weights: &OutlierWeights<T>,
        matches: &Matches<T>,
        iterate: &mut bool,
    ) -> TransformationParameters<T>;
}

/// Stateful termination and divergence policy.
///
/// `check` observes the re-based transformation each iteration and may clear
/// `iterate` (normal termination) or return a [`AlignError::Convergence`]
/// (abnormal termination). The `values`/`limits` accessors expose the
/// checker's state to inspectors.
pub trait TransformationChecker<T: RealField + Copy> {
    fn init(&mut self, parameters: &TransformationParameters<T>, iterate: &mut bool)
        -> Result<()>;

    fn check(&mut self, parameters: &TransformationParameters<T>, iterate: &mut bool)
        -> Result<()>;

    fn values(&self) -> &DVector<T>;
    fn limits(&self) -> &DVector<T>;
    fn value_names(&self) -> &'static [&'static str];
    fn limit_names(&self) -> &'static [&'static str];
}

/// Purely observational diagnostic sink; must not mutate its inputs.
pub trait Inspector<T: RealField + Copy> {
    fn init(&mut self);

    #[allow(clippy::too_many_arguments)]
    fn dump_iteration(
        &mut self,
        iteration: usize,
        parameters: &TransformationParameters<T>,
        filtered_reference: &DataPoints<T>,
        reading: &DataPoints<T>,
        matches: &Matches<T>,
        feature_weights: &OutlierWeights<T>,
        descriptor_weights: &OutlierWeights<T>,
        checkers: &TransformationCheckers<T>,
    );

    fn finish(&mut self, iteration_count: usize);
}

/// Ordered sequence of data-points filters, applied in declaration order.
pub struct DataPointsFilters<T: RealField + Copy>(Vec<Box<dyn DataPointsFilter<T>>>);

impl<T: RealField + Copy> Default for DataPointsFilters<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy> DataPointsFilters<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, filter: Box<dyn DataPointsFilter<T>>) {
        self.0.push(filter);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Run every filter's pre hook, each consuming the previous output.
    pub fn apply_pre(&mut self, mut cloud: DataPoints<T>, iterate: &mut bool) -> DataPoints<T> {
        for filter in &mut self.0 {
            cloud = filter.pre_filter(cloud, iterate);
        }
        cloud
    }

    /// Run every filter's step hook, each consuming the previous output.
    pub fn apply_step(&mut self, mut cloud: DataPoints<T>, iterate: &mut bool) -> DataPoints<T> {
        for filter in &mut self.0 {
            cloud = filter.step_filter(cloud, iterate);
        }
        cloud
    }
}

/// Ordered sequence of transformations, composed left to right.
pub struct Transformations<T: RealField + Copy>(Vec<Box<dyn Transformation<T>>>);

impl<T: RealField + Copy> Default for Transformations<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy> Transformations<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, transformation: Box<dyn Transformation<T>>) {
        self.0.push(transformation);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(
        &self,
        mut cloud: DataPoints<T>,
        parameters: &TransformationParameters<T>,
    ) -> DataPoints<T> {
        for transformation in &self.0 {
            cloud = transformation.compute(cloud, parameters);
        }
        cloud
    }
}

/// Ordered sequence of feature-outlier filters whose outputs are multiplied
/// element-wise.
pub struct FeatureOutlierFilters<T: RealField + Copy>(Vec<Box<dyn FeatureOutlierFilter<T>>>);

impl<T: RealField + Copy> Default for FeatureOutlierFilters<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy> FeatureOutlierFilters<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, filter: Box<dyn FeatureOutlierFilter<T>>) {
        self.0.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Element-wise product of all registered filters' outputs. An empty
    /// collection yields an all-ones matrix; otherwise the first filter's
    /// output seeds the product directly.
    pub fn compute(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        matches: &Matches<T>,
        iterate: &mut bool,
    ) -> OutlierWeights<T> {
        let mut filters = self.0.iter_mut();
        let mut weights = match filters.next() {
            Some(first) => first.compute(filtered_reading, filtered_reference, matches, iterate),
            None => OutlierWeights::from_element(
                matches.dists.nrows(),
                matches.dists.ncols(),
                T::one(),
            ),
        };
        for filter in filters {
            weights.component_mul_assign(&filter.compute(
                filtered_reading,
                filtered_reference,
                matches,
                iterate,
            ));
        }
        weights
    }
}

/// Ordered sequence of transformation checkers.
///
/// Every checker observes every iteration; there is no short-circuit on
/// `iterate`, only on a raised convergence error.
pub struct TransformationCheckers<T: RealField + Copy>(Vec<Box<dyn TransformationChecker<T>>>);

impl<T: RealField + Copy> Default for TransformationCheckers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy> TransformationCheckers<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, checker: Box<dyn TransformationChecker<T>>) {
        self.0.push(checker);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn init(
        &mut self,
        parameters: &TransformationParameters<T>,
        iterate: &mut bool,
    ) -> Result<()> {
        for checker in &mut self.0 {
            checker.init(parameters, iterate)?;
        }
        Ok(())
    }

    pub fn check(
        &mut self,
        parameters: &TransformationParameters<T>,
        iterate: &mut bool,
    ) -> Result<()> {
        for checker in &mut self.0 {
            checker.check(parameters, iterate)?;
        }
        Ok(())
    }

    /// Read-only view over the checkers, for inspectors.
    pub fn iter(&self) -> impl Iterator<Item = &dyn TransformationChecker<T>> + '_ {
        self.0.iter().map(|checker| checker.as_ref())
    }
}

/// Everything the driver composes with for one registration problem.
///
/// The matcher, descriptor-outlier filter, error minimizer and inspector are
/// mandatory, which the field types enforce; the collections may be empty.
/// The bundle is borrowed mutably for the duration of a driver call and the
/// driver neither creates nor destroys stages.
pub struct IcpStrategy<T: RealField + Copy> {
    pub reading_filters: DataPointsFilters<T>,
    pub reference_filters: DataPointsFilters<T>,
    pub transformations: Transformations<T>,
    pub matcher: Box<dyn Matcher<T>>,
    pub feature_outlier_filters: FeatureOutlierFilters<T>,
    pub descriptor_outlier_filter: Box<dyn DescriptorOutlierFilter<T>>,
    /// Blend factor between feature and descriptor weights, in `[0, 1]`:
    /// `1` trusts feature evidence alone, `0` descriptor evidence alone.
    pub outlier_mixing_weight: T,
    pub error_minimizer: Box<dyn ErrorMinimizer<T>>,
    pub transformation_checkers: TransformationCheckers<T>,
    pub inspector: Box<dyn Inspector<T>>,
}

/// Register `reading` onto `reference` starting from `initial_parameters`.
///
/// Returns the rigid transformation that best aligns the original reading
/// onto the original reference under the strategy's error minimizer.
///
/// The reference is translated to its centroid for the duration of the
/// computation to condition the minimizer's linear algebra; the reading is
/// left in place, its centering being absorbed by the initial transform. The
/// returned transformation is expressed in the original reference frame.
pub fn icp<T: RealField + Copy>(
    initial_parameters: &TransformationParameters<T>,
    reading: DataPoints<T>,
    mut reference: DataPoints<T>,
    strategy: &mut IcpStrategy<T>,
) -> Result<TransformationParameters<T>> {
    let dim = reading.features.nrows();
    if dim != reference.features.nrows() {
        return Err(AlignError::InvalidInput(format!(
            "dimensionality mismatch between reading ({} rows) and reference ({} rows)",
            dim,
            reference.features.nrows()
        )));
    }
    if dim != 3 && dim != 4 {
        return Err(AlignError::InvalidInput(format!(
            "clouds must hold 2D or 3D homogeneous features, got {} rows",
            dim
        )));
    }
    if reading.point_count() == 0 || reference.point_count() == 0 {
        return Err(AlignError::InvalidInput(
            "clouds must not be empty".to_string(),
        ));
    }
    if initial_parameters.nrows() != dim || initial_parameters.ncols() != dim {
        return Err(AlignError::InvalidInput(format!(
            "initial transformation must be {dim} x {dim}, got {} x {}",
            initial_parameters.nrows(),
            initial_parameters.ncols()
        )));
    }

    let preprocess_timer = Instant::now();

    // Move the reference to its center of mass; the homogeneous row stays
    // untouched. T_ref restores the original frame afterwards.
    let mean_reference = reference.features.column_mean();
    for i in 0..dim - 1 {
        for j in 0..reference.features.ncols() {
            reference.features[(i, j)] -= mean_reference[i];
        }
    }

    let mut t_ref = TransformationParameters::identity(dim, dim);
    let mut t_ref_inv = TransformationParameters::identity(dim, dim);
    for i in 0..dim - 1 {
        t_ref[(i, dim - 1)] = mean_reference[i];
        // Translation-only matrix, so the inverse is the negated column.
        t_ref_inv[(i, dim - 1)] = -mean_reference[i];
    }

    let mut iterate = true;

    let reading = strategy.reading_filters.apply_pre(reading, &mut iterate);
    let reference = strategy.reference_filters.apply_pre(reference, &mut iterate);

    strategy
        .transformation_checkers
        .init(initial_parameters, &mut iterate)?;
    strategy.matcher.init(&reading, &reference, &mut iterate);
    strategy.inspector.init();

    let mut transformation = &t_ref_inv * initial_parameters;
    let mut iteration_count = 0usize;

    debug!(
        "icp: preprocessing took {:?}",
        preprocess_timer.elapsed()
    );
    let loop_timer = Instant::now();

    while iterate {
        // Fresh copies each iteration: step filters may re-draw, and the
        // base clouds are never mutated inside the loop.
        let step_reading = strategy
            .reading_filters
            .apply_step(reading.clone(), &mut iterate);
        let step_reference = strategy
            .reference_filters
            .apply_step(reference.clone(), &mut iterate);

        let step_reading = strategy
            .transformations
            .apply(step_reading, &transformation);

        let matches = strategy
            .matcher
            .find_closests(&step_reading, &step_reference, &mut iterate);

        let feature_weights = strategy.feature_outlier_filters.compute(
            &step_reading,
            &step_reference,
            &matches,
            &mut iterate,
        );
        let descriptor_weights = strategy.descriptor_outlier_filter.compute(
            &step_reading,
            &step_reference,
            &matches,
            &mut iterate,
        );

        debug_assert_eq!(feature_weights.shape(), matches.ids.shape());
        debug_assert_eq!(descriptor_weights.shape(), matches.ids.shape());

        let alpha = strategy.outlier_mixing_weight;
        let outlier_weights =
            &feature_weights * alpha + &descriptor_weights * (T::one() - alpha);

        strategy.inspector.dump_iteration(
            iteration_count,
            &transformation,
            &step_reference,
            &step_reading,
            &matches,
            &feature_weights,
            &descriptor_weights,
            &strategy.transformation_checkers,
        );

        let correction = strategy.error_minimizer.compute(
            &step_reading,
            &step_reference,
            &outlier_weights,
            &matches,
            &mut iterate,
        );
        transformation = &transformation * &correction;

        strategy
            .transformation_checkers
            .check(&(&t_ref * &transformation), &mut iterate)?;

        iteration_count += 1;
    }

    strategy.inspector.finish(iteration_count);

    debug!(
        "icp: {} iterations took {:?}",
        iteration_count,
        loop_timer.elapsed()
    );

    // Move the transformation back to the original reference frame.
    Ok(&t_ref * &transformation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    use crate::inspectors::NullInspector;
    use crate::matchers::BruteForceMatcher;
    use crate::minimizers::PointToPointMinimizer;
    use crate::outliers::NullDescriptorOutlierFilter;
    use crate::transforms::FeatureTransform;

    fn cloud(points: &[[f64; 2]]) -> DataPoints<f64> {
        let mut features = DMatrix::from_element(3, points.len(), 1.0);
        for (j, p) in points.iter().enumerate() {
            features[(0, j)] = p[0];
            features[(1, j)] = p[1];
        }
        DataPoints::from_features(features)
    }

    fn minimal_strategy() -> IcpStrategy<f64> {
        let mut transformations = Transformations::new();
        transformations.push(Box::new(FeatureTransform::new()));
        IcpStrategy {
            reading_filters: DataPointsFilters::new(),
            reference_filters: DataPointsFilters::new(),
            transformations,
            matcher: Box::new(BruteForceMatcher::new()),
            feature_outlier_filters: FeatureOutlierFilters::new(),
            descriptor_outlier_filter: Box::new(NullDescriptorOutlierFilter::new()),
            outlier_mixing_weight: 1.0,
            error_minimizer: Box::new(PointToPointMinimizer::new()),
            transformation_checkers: TransformationCheckers::new(),
            inspector: Box::new(NullInspector::new()),
        }
    }

    /// Filter that tags its invocations, to pin down collection ordering.
    struct TaggingFilter {
        tag: f64,
        log: std::rc::Rc<std::cell::RefCell<Vec<f64>>>,
    }

    impl DataPointsFilter<f64> for TaggingFilter {
        fn pre_filter(&mut self, cloud: DataPoints<f64>, _iterate: &mut bool) -> DataPoints<f64> {
            self.log.borrow_mut().push(self.tag);
            cloud
        }

        fn step_filter(&mut self, cloud: DataPoints<f64>, _iterate: &mut bool) -> DataPoints<f64> {
            cloud
        }
    }

    #[test]
    fn filters_run_in_declaration_order() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut filters = DataPointsFilters::new();
        for tag in [1.0, 2.0, 3.0] {
            filters.push(Box::new(TaggingFilter {
                tag,
                log: log.clone(),
            }));
        }

        let mut iterate = true;
        filters.apply_pre(cloud(&[[0.0, 0.0]]), &mut iterate);
        assert_eq!(*log.borrow(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn empty_outlier_collection_yields_ones() {
        let mut filters = FeatureOutlierFilters::<f64>::new();
        let matches = Matches::new(
            DMatrix::from_element(1, 3, 0usize),
            DMatrix::from_element(1, 3, 0.0),
        );
        let mut iterate = true;
        let weights = filters.compute(
            &cloud(&[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]),
            &cloud(&[[0.0, 0.0]]),
            &matches,
            &mut iterate,
        );
        assert_eq!(weights, OutlierWeights::from_element(1, 3, 1.0));
    }

    #[test]
    fn rejects_empty_clouds() {
        let mut strategy = minimal_strategy();
        let initial = DMatrix::<f64>::identity(3, 3);
        let empty = DataPoints::from_features(DMatrix::from_element(3, 0, 1.0));
        let result = icp(&initial, empty, cloud(&[[0.0, 0.0]]), &mut strategy);
        assert!(matches!(result, Err(AlignError::InvalidInput(_))));
    }

    #[test]
    fn rejects_dimensionality_mismatch() {
        let mut strategy = minimal_strategy();
        let initial = DMatrix::<f64>::identity(3, 3);
        let reading = cloud(&[[0.0, 0.0]]);
        let mut features = DMatrix::from_element(4, 1, 1.0);
        features[(0, 0)] = 0.0;
        features[(1, 0)] = 0.0;
        features[(2, 0)] = 0.0;
        let reference = DataPoints::from_features(features);
        let result = icp(&initial, reading, reference, &mut strategy);
        assert!(matches!(result, Err(AlignError::InvalidInput(_))));
    }

    #[test]
    fn rejects_non_square_initial_transformation() {
        let mut strategy = minimal_strategy();
        let initial = DMatrix::<f64>::from_element(3, 2, 0.0);
        let result = icp(
            &initial,
            cloud(&[[0.0, 0.0]]),
            cloud(&[[1.0, 0.0]]),
            &mut strategy,
        );
        assert!(matches!(result, Err(AlignError::InvalidInput(_))));
    }

    #[test]
    fn returns_initial_transformation_when_no_checker_iterates() {
        // A checker clearing `iterate` during init must skip the loop and
        // hand back the initial transformation unchanged.
        struct Refusing {
            values: DVector<f64>,
            limits: DVector<f64>,
        }

        impl TransformationChecker<f64> for Refusing {
            fn init(
                &mut self,
                _parameters: &TransformationParameters<f64>,
                iterate: &mut bool,
            ) -> Result<()> {
                *iterate = false;
                Ok(())
            }

            fn check(
                &mut self,
                _parameters: &TransformationParameters<f64>,
                _iterate: &mut bool,
            ) -> Result<()> {
                Ok(())
            }

            fn values(&self) -> &DVector<f64> {
                &self.values
            }

            fn limits(&self) -> &DVector<f64> {
                &self.limits
            }

            fn value_names(&self) -> &'static [&'static str] {
                &[]
            }

            fn limit_names(&self) -> &'static [&'static str] {
                &[]
            }
        }

        let mut strategy = minimal_strategy();
        strategy.transformation_checkers.push(Box::new(Refusing {
            values: DVector::zeros(0),
            limits: DVector::zeros(0),
        }));

        let mut initial = DMatrix::<f64>::identity(3, 3);
        initial[(0, 2)] = 7.0;
        let result = icp(
            &initial,
            cloud(&[[0.0, 0.0], [1.0, 0.0]]),
            cloud(&[[2.0, 1.0], [3.0, 1.0]]),
            &mut strategy,
        )
        .unwrap();

        assert_eq!(result, initial);
    }
}
