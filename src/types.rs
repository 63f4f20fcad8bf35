//! Core shared types for the registration engine.
//!
//! Clouds and transformations are carried by dynamically sized `nalgebra`
//! matrices so that the 2D and 3D cases flow through the same code path: a
//! cloud is a `(d+1) x n` block of homogeneous feature columns plus an
//! optional `k x n` block of per-point descriptors, and a rigid
//! transformation is a `(d+1) x (d+1)` homogeneous matrix.

use nalgebra::{DMatrix, RealField};

/// Rigid transformation in homogeneous form.
///
/// Square `(d+1) x (d+1)` matrix whose bottom row is `(0, ..., 0, 1)`. The
/// leading `d x d` block is a rotation and the rightmost column holds the
/// translation.
pub type TransformationParameters<T> = DMatrix<T>;

/// Per-correspondence weights in `[0, 1]`, aligned with [`Matches`].
///
/// Weight `0` disables a correspondence, weight `1` accepts it fully.
pub type OutlierWeights<T> = DMatrix<T>;

/// A point cloud: homogeneous feature coordinates plus optional descriptors.
#[derive(Clone, Debug, PartialEq)]
pub struct DataPoints<T: RealField> {
    /// `(d+1) x n` homogeneous coordinates; the last row is the constant 1.
    pub features: DMatrix<T>,
    /// `k x n` per-point attributes (normals, colors, ...), `k >= 0`.
    /// Columns correspond one-to-one with feature columns.
    pub descriptors: DMatrix<T>,
}

impl<T: RealField + Copy> DataPoints<T> {
    /// Create a cloud from homogeneous features and aligned descriptors.
    pub fn new(features: DMatrix<T>, descriptors: DMatrix<T>) -> Self {
        debug_assert!(
            descriptors.nrows() == 0 || descriptors.ncols() == features.ncols(),
            "descriptor columns must align with feature columns"
        );
        Self {
            features,
            descriptors,
        }
    }

    /// Create a cloud from homogeneous features alone.
    pub fn from_features(features: DMatrix<T>) -> Self {
        let n = features.ncols();
        Self {
            features,
            descriptors: DMatrix::zeros(0, n),
        }
    }

    /// Number of points in the cloud.
    pub fn point_count(&self) -> usize {
        self.features.ncols()
    }

    /// Spatial dimensionality `d` (2 or 3), one less than the feature rows.
    pub fn dimension(&self) -> usize {
        self.features.nrows().saturating_sub(1)
    }

    /// Whether the homogeneous row is exactly one everywhere.
    pub fn is_homogeneous(&self) -> bool {
        let last = self.features.nrows().saturating_sub(1);
        self.features.row(last).iter().all(|&v| v == T::one())
    }
}

/// Nearest-neighbor correspondences between a reading and a reference cloud.
///
/// Both matrices have shape `m x n`: `n` reading points, `m` neighbors per
/// point. `ids[(i, j)]` is the reference column matched to reading column `j`
/// as its `i`-th neighbor; `dists[(i, j)]` is the **squared** Euclidean
/// distance of that pair. Distance-thresholded stages must account for the
/// squaring.
#[derive(Clone, Debug, PartialEq)]
pub struct Matches<T: RealField> {
    pub ids: DMatrix<usize>,
    pub dists: DMatrix<T>,
}

impl<T: RealField + Copy> Matches<T> {
    pub fn new(ids: DMatrix<usize>, dists: DMatrix<T>) -> Self {
        debug_assert_eq!(ids.shape(), dists.shape());
        Self { ids, dists }
    }

    /// Neighbors returned per reading point.
    pub fn knn(&self) -> usize {
        self.ids.nrows()
    }

    /// Number of reading points matched.
    pub fn point_count(&self) -> usize {
        self.ids.ncols()
    }
}
