//! Error minimizers: from weighted correspondences to a rigid correction.
//!
//! `PointToPointMinimizer` solves the weighted Procrustes problem in closed
//! form for 2D and 3D clouds. `PointToPlaneMinimizer` linearizes the
//! point-to-plane objective around the identity and solves the resulting
//! normal equations, lifting the increment back to SE(3) through the
//! exponential map; it needs reference surface normals in the descriptor
//! block and is 3D only.

use nalgebra::{convert, DMatrix, DVector, Matrix3, Matrix6, RealField, Vector3, Vector6};

use crate::core::ErrorMinimizer;
use crate::types::{DataPoints, Matches, OutlierWeights, TransformationParameters};
use crate::utils::is_nan;

/// Weighted closed-form rigid fit of matched pairs (Procrustes analysis).
///
/// Centers both sides on their weighted centroids, accumulates the weighted
/// cross-covariance, and reads the rotation off its SVD with the usual
/// reflection fix. Degenerate input (no surviving weight, NaN covariance,
/// empty matches) yields an identity correction and requests termination.
pub struct PointToPointMinimizer;

impl Default for PointToPointMinimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PointToPointMinimizer {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> ErrorMinimizer<T> for PointToPointMinimizer {
    fn compute(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        outlier_weights: &OutlierWeights<T>,
        matches: &Matches<T>,
        iterate: &mut bool,
    ) -> TransformationParameters<T> {
        let dim = filtered_reading.dimension();
        let identity = TransformationParameters::identity(dim + 1, dim + 1);
        let (m, n) = matches.ids.shape();

        let mut weight_sum = T::zero();
        let mut centroid_reading = DVector::<T>::zeros(dim);
        let mut centroid_reference = DVector::<T>::zeros(dim);
        for j in 0..n {
            for i in 0..m {
                let w = outlier_weights[(i, j)];
                if w <= T::zero() {
                    continue;
                }
                let id = matches.ids[(i, j)];
                for r in 0..dim {
                    centroid_reading[r] += filtered_reading.features[(r, j)] * w;
                    centroid_reference[r] += filtered_reference.features[(r, id)] * w;
                }
                weight_sum += w;
            }
        }

        if weight_sum <= T::zero() {
            *iterate = false;
            return identity;
        }
        centroid_reading /= weight_sum;
        centroid_reference /= weight_sum;

        let mut covariance = DMatrix::<T>::zeros(dim, dim);
        for j in 0..n {
            for i in 0..m {
                let w = outlier_weights[(i, j)];
                if w <= T::zero() {
                    continue;
                }
                let id = matches.ids[(i, j)];
                for r in 0..dim {
                    let p = filtered_reading.features[(r, j)] - centroid_reading[r];
                    for c in 0..dim {
                        let q = filtered_reference.features[(c, id)] - centroid_reference[c];
                        covariance[(r, c)] += p * q * w;
                    }
                }
            }
        }

        if covariance.iter().any(|&x| is_nan(x)) {
            *iterate = false;
            return identity;
        }

        let svd = covariance.svd(true, true);
        let u = svd.u.unwrap();
        let v = svd.v_t.unwrap().transpose();

        let mut rotation = &v * u.transpose();
        // A negative determinant means the fit picked a reflection; flip the
        // weakest direction back.
        if rotation.determinant() < T::zero() {
            let mut v_neg = v.clone();
            v_neg.column_mut(dim - 1).neg_mut();
            rotation = &v_neg * u.transpose();
        }

        let translation = &centroid_reference - &rotation * &centroid_reading;

        let mut correction = identity;
        for r in 0..dim {
            for c in 0..dim {
                correction[(r, c)] = rotation[(r, c)];
            }
            correction[(r, dim)] = translation[r];
        }
        correction
    }
}

/// Weighted point-to-plane solver for 3D clouds.
///
/// Minimizes the sum of squared distances along the reference surface
/// normals, which must occupy the first three descriptor rows of the
/// reference cloud (see `SurfaceNormalsFilter`).
pub struct PointToPlaneMinimizer;

impl Default for PointToPlaneMinimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PointToPlaneMinimizer {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> ErrorMinimizer<T> for PointToPlaneMinimizer {
    fn compute(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        outlier_weights: &OutlierWeights<T>,
        matches: &Matches<T>,
        iterate: &mut bool,
    ) -> TransformationParameters<T> {
        let rows = filtered_reading.features.nrows();
        let identity = TransformationParameters::identity(rows, rows);
        if rows != 4 || filtered_reference.descriptors.nrows() < 3 {
            *iterate = false;
            return identity;
        }

        let (m, n) = matches.ids.shape();
        let mut ata = Matrix6::<T>::zeros();
        let mut atb = Vector6::<T>::zeros();
        let mut any_pair = false;

        for j in 0..n {
            for i in 0..m {
                let w = outlier_weights[(i, j)];
                if w <= T::zero() {
                    continue;
                }
                let id = matches.ids[(i, j)];

                let p = Vector3::new(
                    filtered_reading.features[(0, j)],
                    filtered_reading.features[(1, j)],
                    filtered_reading.features[(2, j)],
                );
                let q = Vector3::new(
                    filtered_reference.features[(0, id)],
                    filtered_reference.features[(1, id)],
                    filtered_reference.features[(2, id)],
                );
                let normal = Vector3::new(
                    filtered_reference.descriptors[(0, id)],
                    filtered_reference.descriptors[(1, id)],
                    filtered_reference.descriptors[(2, id)],
                );

                let residual = (p - q).dot(&normal);
                let cross = p.cross(&normal);
                let jacobian =
                    Vector6::new(normal.x, normal.y, normal.z, cross.x, cross.y, cross.z);

                ata += jacobian * jacobian.transpose() * w;
                atb += jacobian * (residual * w);
                any_pair = true;
            }
        }

        if !any_pair {
            *iterate = false;
            return identity;
        }

        match ata.try_inverse() {
            Some(ata_inv) => {
                let delta = ata_inv * (-atb);
                exponential_map_se3(&delta)
            }
            None => {
                *iterate = false;
                identity
            }
        }
    }
}

/// Exponential map from se(3) to SE(3); `delta` is `[v, omega]`.
fn exponential_map_se3<T: RealField + Copy>(delta: &Vector6<T>) -> TransformationParameters<T> {
    let v = Vector3::new(delta[0], delta[1], delta[2]);
    let omega = Vector3::new(delta[3], delta[4], delta[5]);
    let theta = omega.norm();

    let small: T = convert(1e-12);
    let (rotation, translation) = if theta < small {
        (Matrix3::identity(), v)
    } else {
        let k = omega / theta;
        let k_cross = Matrix3::new(
            T::zero(),
            -k.z,
            k.y,
            k.z,
            T::zero(),
            -k.x,
            -k.y,
            k.x,
            T::zero(),
        );
        let k_cross_sq = k_cross * k_cross;
        let rotation = Matrix3::identity()
            + k_cross * theta.sin()
            + k_cross_sq * (T::one() - theta.cos());
        let left_jacobian = Matrix3::identity()
            + k_cross * ((T::one() - theta.cos()) / theta)
            + k_cross_sq * ((theta - theta.sin()) / (theta * theta));
        (rotation, left_jacobian * v)
    };

    let mut transform = TransformationParameters::identity(4, 4);
    for r in 0..3 {
        for c in 0..3 {
            transform[(r, c)] = rotation[(r, c)];
        }
        transform[(r, 3)] = translation[r];
    }
    transform
}
