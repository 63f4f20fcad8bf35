//! Transformation checkers: termination and divergence policies.
//!
//! Three policies cover the usual needs: a plain iteration counter, a
//! delta-error checker averaging successive pose changes over a sliding
//! window, and an absolute bound guarding against runaway transformations.
//! All of them expose their state through `values`/`limits` so inspectors
//! can report per-iteration progress.

use log::debug;
use nalgebra::{convert, DVector, RealField, UnitQuaternion};

use crate::core::TransformationChecker;
use crate::error::{AlignError, Result};
use crate::types::TransformationParameters;
use crate::utils::{is_nan, rotation_quaternion, translation_part};

/// Terminates after a fixed number of iterations. Never raises; this is the
/// most permissive safety net and is usually registered alongside another
/// policy.
pub struct CounterTransformationChecker<T: RealField + Copy> {
    values: DVector<T>,
    limits: DVector<T>,
}

impl<T: RealField + Copy> CounterTransformationChecker<T> {
    pub fn new(max_iteration_count: usize) -> Self {
        let mut limits = DVector::zeros(1);
        limits[0] = convert(max_iteration_count as f64);
        Self {
            values: DVector::zeros(1),
            limits,
        }
    }
}

impl<T: RealField + Copy> TransformationChecker<T> for CounterTransformationChecker<T> {
    fn init(
        &mut self,
        _parameters: &TransformationParameters<T>,
        _iterate: &mut bool,
    ) -> Result<()> {
        self.values.fill(T::zero());
        Ok(())
    }

    fn check(
        &mut self,
        _parameters: &TransformationParameters<T>,
        iterate: &mut bool,
    ) -> Result<()> {
        self.values[0] += T::one();
        debug!("iteration: {} / {}", self.values[0], self.limits[0]);
        if self.values[0] >= self.limits[0] {
            *iterate = false;
        }
        Ok(())
    }

    fn values(&self) -> &DVector<T> {
        &self.values
    }

    fn limits(&self) -> &DVector<T> {
        &self.limits
    }

    fn value_names(&self) -> &'static [&'static str] {
        &["iteration"]
    }

    fn limit_names(&self) -> &'static [&'static str] {
        &["max iteration"]
    }
}

/// Terminates once the pose stops moving, diverges when it drifts the wrong
/// way.
///
/// Each `init`/`check` call appends the current rotation (as a unit
/// quaternion; 2D rotations are embedded into identity-padded 3x3 matrices
/// first) and translation to a history. Once the history exceeds `tail`
/// entries, the last `tail` consecutive step magnitudes are averaged:
/// `values[0]`/`values[1]` hold the mean absolute rotation and translation
/// deltas, `values[2]`/`values[3]` the same means without the absolute
/// value. Both deltas dropping below their minima clears `iterate`; NaN in
/// the averaged deltas or both signed means dropping below the negated
/// minima raises a convergence error. Until the history fills, calls only
/// append.
pub struct ErrorTransformationChecker<T: RealField + Copy> {
    values: DVector<T>,
    limits: DVector<T>,
    tail: usize,
    rotations: Vec<UnitQuaternion<T>>,
    translations: Vec<DVector<T>>,
}

impl<T: RealField + Copy> ErrorTransformationChecker<T> {
    /// `tail` is the smoothing window and must be positive.
    pub fn new(min_delta_rot_err: T, min_delta_trans_err: T, tail: usize) -> Self {
        debug_assert!(tail > 0, "smoothing window must be positive");
        let mut limits = DVector::zeros(4);
        limits[0] = min_delta_rot_err;
        limits[1] = min_delta_trans_err;
        limits[2] = -min_delta_rot_err;
        limits[3] = -min_delta_trans_err;
        Self {
            values: DVector::zeros(4),
            limits,
            tail,
            rotations: Vec::new(),
            translations: Vec::new(),
        }
    }

    fn push(&mut self, parameters: &TransformationParameters<T>) {
        self.rotations.push(rotation_quaternion(parameters));
        self.translations.push(translation_part(parameters));
    }
}

impl<T: RealField + Copy> TransformationChecker<T> for ErrorTransformationChecker<T> {
    fn init(
        &mut self,
        parameters: &TransformationParameters<T>,
        _iterate: &mut bool,
    ) -> Result<()> {
        self.values.fill(T::zero());
        self.rotations.clear();
        self.translations.clear();
        self.push(parameters);
        Ok(())
    }

    fn check(&mut self, parameters: &TransformationParameters<T>, iterate: &mut bool) -> Result<()> {
        self.push(parameters);

        self.values.fill(T::zero());
        if self.rotations.len() <= self.tail {
            return Ok(());
        }

        let len = self.rotations.len();
        for i in (len - self.tail)..len {
            let delta_rot = self.rotations[i].angle_to(&self.rotations[i - 1]);
            let delta_trans = (&self.translations[i] - &self.translations[i - 1]).norm();
            self.values[0] += delta_rot.abs();
            self.values[1] += delta_trans.abs();
            self.values[2] += delta_rot;
            self.values[3] += delta_trans;
        }
        self.values /= convert(self.tail as f64);

        debug!(
            "abs rotation: {} / {}, abs translation: {} / {}",
            self.values[0], self.limits[0], self.values[1], self.limits[1]
        );

        if self.values[0] < self.limits[0] && self.values[1] < self.limits[1] {
            *iterate = false;
        }

        if is_nan(self.values[0]) {
            return Err(AlignError::Convergence(
                "abs rotation norm not a number".to_string(),
            ));
        }
        if is_nan(self.values[1]) {
            return Err(AlignError::Convergence(
                "abs translation norm not a number".to_string(),
            ));
        }
        if self.values[2] < self.limits[2] && self.values[3] < self.limits[3] {
            return Err(AlignError::Convergence("error is increasing".to_string()));
        }

        Ok(())
    }

    fn values(&self) -> &DVector<T> {
        &self.values
    }

    fn limits(&self) -> &DVector<T> {
        &self.limits
    }

    fn value_names(&self) -> &'static [&'static str] {
        &[
            "mean abs delta rotation err",
            "mean abs delta translation err",
            "mean delta rotation err",
            "mean delta translation err",
        ]
    }

    fn limit_names(&self) -> &'static [&'static str] {
        &["min delta rotation err", "min delta translation err"]
    }
}

/// Raises once the transformation strays too far from where it started.
///
/// Purely a divergence guard: it never clears `iterate`. 3D only; handing
/// it a 2D transformation is a precondition violation reported from `init`.
pub struct BoundTransformationChecker<T: RealField + Copy> {
    values: DVector<T>,
    limits: DVector<T>,
    initial_rotation: UnitQuaternion<T>,
    initial_translation: DVector<T>,
}

impl<T: RealField + Copy> BoundTransformationChecker<T> {
    pub fn new(max_rotation_norm: T, max_translation_norm: T) -> Self {
        let mut limits = DVector::zeros(2);
        limits[0] = max_rotation_norm;
        limits[1] = max_translation_norm;
        Self {
            values: DVector::zeros(2),
            limits,
            initial_rotation: UnitQuaternion::identity(),
            initial_translation: DVector::zeros(3),
        }
    }
}

impl<T: RealField + Copy> TransformationChecker<T> for BoundTransformationChecker<T> {
    fn init(
        &mut self,
        parameters: &TransformationParameters<T>,
        _iterate: &mut bool,
    ) -> Result<()> {
        if parameters.nrows() != 4 {
            return Err(AlignError::InvalidInput(
                "bound checker requires 3D transformations".to_string(),
            ));
        }
        self.values.fill(T::zero());
        self.initial_rotation = rotation_quaternion(parameters);
        self.initial_translation = translation_part(parameters);
        Ok(())
    }

    fn check(
        &mut self,
        parameters: &TransformationParameters<T>,
        _iterate: &mut bool,
    ) -> Result<()> {
        let current_rotation = rotation_quaternion(parameters);
        let current_translation = translation_part(parameters);
        self.values[0] = current_rotation.angle_to(&self.initial_rotation);
        self.values[1] = (&current_translation - &self.initial_translation).norm();
        if self.values[0] > self.limits[0] || self.values[1] > self.limits[1] {
            return Err(AlignError::Convergence(format!(
                "limit out of bounds: rot: {}/{} tr: {}/{}",
                self.values[0], self.limits[0], self.values[1], self.limits[1]
            )));
        }
        Ok(())
    }

    fn values(&self) -> &DVector<T> {
        &self.values
    }

    fn limits(&self) -> &DVector<T> {
        &self.limits
    }

    fn value_names(&self) -> &'static [&'static str] {
        &["rotation angle", "translation norm"]
    }

    fn limit_names(&self) -> &'static [&'static str] {
        &["max rotation angle", "max translation norm"]
    }
}
