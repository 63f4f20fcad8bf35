//! Inspectors: observational hooks into the iteration loop.
//!
//! Inspectors receive a per-iteration snapshot of the pipeline state and may
//! do whatever they want with it short of mutating it. The engine ships a
//! no-op inspector, one that routes progress through the `log` facade, and a
//! counting inspector used by the high-level API to report iteration counts.

use std::cell::Cell;
use std::rc::Rc;

use log::debug;
use nalgebra::RealField;

use crate::core::{Inspector, TransformationCheckers};
use crate::types::{DataPoints, Matches, OutlierWeights, TransformationParameters};

/// Ignores everything.
pub struct NullInspector;

impl Default for NullInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl NullInspector {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> Inspector<T> for NullInspector {
    fn init(&mut self) {}

    fn dump_iteration(
        &mut self,
        _iteration: usize,
        _parameters: &TransformationParameters<T>,
        _filtered_reference: &DataPoints<T>,
        _reading: &DataPoints<T>,
        _matches: &Matches<T>,
        _feature_weights: &OutlierWeights<T>,
        _descriptor_weights: &OutlierWeights<T>,
        _checkers: &TransformationCheckers<T>,
    ) {
    }

    fn finish(&mut self, _iteration_count: usize) {}
}

/// Logs the transformation and every checker's state each iteration.
pub struct LogInspector;

impl Default for LogInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl LogInspector {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> Inspector<T> for LogInspector {
    fn init(&mut self) {}

    fn dump_iteration(
        &mut self,
        iteration: usize,
        parameters: &TransformationParameters<T>,
        _filtered_reference: &DataPoints<T>,
        reading: &DataPoints<T>,
        matches: &Matches<T>,
        _feature_weights: &OutlierWeights<T>,
        _descriptor_weights: &OutlierWeights<T>,
        checkers: &TransformationCheckers<T>,
    ) {
        debug!(
            "iteration {}: {} reading points, {} neighbors each",
            iteration,
            reading.point_count(),
            matches.knn()
        );
        debug!("transformation: {}", parameters);
        for checker in checkers.iter() {
            for (name, value) in checker.value_names().iter().zip(checker.values().iter()) {
                debug!("  {}: {}", name, value);
            }
        }
    }

    fn finish(&mut self, iteration_count: usize) {
        debug!("finished after {} iterations", iteration_count);
    }
}

/// Records the final iteration count into a shared cell.
pub struct CountingInspector {
    count: Rc<Cell<usize>>,
}

impl Default for CountingInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingInspector {
    pub fn new() -> Self {
        Self {
            count: Rc::new(Cell::new(0)),
        }
    }

    /// Handle that stays readable after the strategy takes the inspector.
    pub fn handle(&self) -> Rc<Cell<usize>> {
        self.count.clone()
    }
}

impl<T: RealField + Copy> Inspector<T> for CountingInspector {
    fn init(&mut self) {
        self.count.set(0);
    }

    fn dump_iteration(
        &mut self,
        _iteration: usize,
        _parameters: &TransformationParameters<T>,
        _filtered_reference: &DataPoints<T>,
        _reading: &DataPoints<T>,
        _matches: &Matches<T>,
        _feature_weights: &OutlierWeights<T>,
        _descriptor_weights: &OutlierWeights<T>,
        _checkers: &TransformationCheckers<T>,
    ) {
    }

    fn finish(&mut self, iteration_count: usize) {
        self.count.set(iteration_count);
    }
}
