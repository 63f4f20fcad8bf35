//! Data-points filters.
//!
//! Filters run in two hooks: once per driver invocation (`pre_filter`) and
//! once per iteration on the working copies (`step_filter`). The ones here
//! cover the common setups: a pass-through, probabilistic subsampling, and
//! PCA surface-normal estimation feeding the point-to-plane minimizer.

use nalgebra::{convert, DMatrix, DVector, RealField, SymmetricEigen};

use crate::core::DataPointsFilter;
use crate::matchers::KdIndex;
use crate::types::DataPoints;
use crate::utils::SamplingRng;

/// Pass-through filter; useful as an explicit placeholder in a pipeline.
pub struct IdentityFilter;

impl Default for IdentityFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityFilter {
    pub fn new() -> Self {
        Self
    }
}

impl<T: RealField + Copy> DataPointsFilter<T> for IdentityFilter {
    fn pre_filter(&mut self, cloud: DataPoints<T>, _iterate: &mut bool) -> DataPoints<T> {
        cloud
    }

    fn step_filter(&mut self, cloud: DataPoints<T>, _iterate: &mut bool) -> DataPoints<T> {
        cloud
    }
}

/// Keeps each column with probability `prob`, re-drawn on every call.
///
/// By default the filter is active in the step hook only, so each iteration
/// of the loop sees a fresh subsample while the base clouds keep their full
/// density; the hooks can be toggled independently.
pub struct RandomSamplingFilter {
    prob: f64,
    in_pre: bool,
    in_step: bool,
    rng: SamplingRng,
}

impl RandomSamplingFilter {
    pub fn new(prob: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&prob));
        Self {
            prob,
            in_pre: false,
            in_step: true,
            rng: SamplingRng::new(),
        }
    }

    /// Construct with a fixed seed (useful for tests).
    pub fn from_seed(prob: f64, seed: u64) -> Self {
        Self {
            prob,
            in_pre: false,
            in_step: true,
            rng: SamplingRng::from_seed(seed),
        }
    }

    pub fn with_pre(mut self, enabled: bool) -> Self {
        self.in_pre = enabled;
        self
    }

    pub fn with_step(mut self, enabled: bool) -> Self {
        self.in_step = enabled;
        self
    }

    fn subsample<T: RealField + Copy>(&mut self, cloud: DataPoints<T>) -> DataPoints<T> {
        let keep: Vec<usize> =
            (0..cloud.point_count()).filter(|_| self.rng.keep(self.prob)).collect();
        DataPoints::new(
            cloud.features.select_columns(keep.iter()),
            cloud.descriptors.select_columns(keep.iter()),
        )
    }
}

impl<T: RealField + Copy> DataPointsFilter<T> for RandomSamplingFilter {
    fn pre_filter(&mut self, cloud: DataPoints<T>, _iterate: &mut bool) -> DataPoints<T> {
        if self.in_pre {
            self.subsample(cloud)
        } else {
            cloud
        }
    }

    fn step_filter(&mut self, cloud: DataPoints<T>, _iterate: &mut bool) -> DataPoints<T> {
        if self.in_step {
            self.subsample(cloud)
        } else {
            cloud
        }
    }
}

/// Estimates a surface normal per point from the PCA of its `k` nearest
/// neighbors and stores the normals as the cloud's descriptors (`d` rows).
///
/// The normal is the eigenvector of the neighborhood covariance with the
/// smallest eigenvalue; its sign is left as the decomposition produces it.
/// Runs in the pre hook only, which is enough for a rigid reference cloud.
pub struct SurfaceNormalsFilter {
    k: usize,
}

impl SurfaceNormalsFilter {
    /// `k` is the neighborhood size, including the query point itself.
    pub fn new(k: usize) -> Self {
        debug_assert!(k >= 3, "a plane fit needs at least three neighbors");
        Self { k }
    }
}

impl<T: RealField + Copy> DataPointsFilter<T> for SurfaceNormalsFilter {
    fn pre_filter(&mut self, cloud: DataPoints<T>, iterate: &mut bool) -> DataPoints<T> {
        let d = cloud.dimension();
        let n = cloud.point_count();
        if n < self.k {
            *iterate = false;
            return cloud;
        }

        let index = KdIndex::build(&cloud);
        let mut normals = DMatrix::zeros(d, n);

        for j in 0..n {
            let neighbors = index.nearest(&cloud, j, self.k);

            let mut centroid = DVector::<T>::zeros(d);
            for &(_, id) in &neighbors {
                for i in 0..d {
                    centroid[i] += cloud.features[(i, id)];
                }
            }
            centroid /= convert(neighbors.len() as f64);

            let mut covariance = DMatrix::<T>::zeros(d, d);
            for &(_, id) in &neighbors {
                let mut centered = DVector::<T>::zeros(d);
                for i in 0..d {
                    centered[i] = cloud.features[(i, id)] - centroid[i];
                }
                covariance += &centered * centered.transpose();
            }
            covariance /= convert(neighbors.len() as f64);

            let eigen = SymmetricEigen::new(covariance);
            let mut min_index = 0;
            for i in 1..d {
                if eigen.eigenvalues[i] < eigen.eigenvalues[min_index] {
                    min_index = i;
                }
            }
            let normal = eigen.eigenvectors.column(min_index);
            for i in 0..d {
                normals[(i, j)] = normal[i];
            }
        }

        DataPoints::new(cloud.features, normals)
    }

    fn step_filter(&mut self, cloud: DataPoints<T>, _iterate: &mut bool) -> DataPoints<T> {
        cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cloud3(points: &[[f64; 3]]) -> DataPoints<f64> {
        let mut features = DMatrix::from_element(4, points.len(), 1.0);
        for (j, p) in points.iter().enumerate() {
            features[(0, j)] = p[0];
            features[(1, j)] = p[1];
            features[(2, j)] = p[2];
        }
        DataPoints::from_features(features)
    }

    #[test]
    fn identity_filter_passes_clouds_through() {
        let cloud = cloud3(&[[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]]);
        let mut filter = IdentityFilter::new();
        let mut iterate = true;
        let out = filter.pre_filter(cloud.clone(), &mut iterate);
        assert_eq!(out, cloud);
    }

    #[test]
    fn random_sampling_keeps_a_fraction() {
        let points: Vec<[f64; 3]> = (0..200)
            .map(|i| [i as f64, (2 * i) as f64, 0.0])
            .collect();
        let cloud = cloud3(&points);

        let mut filter = RandomSamplingFilter::from_seed(0.5, 7);
        let mut iterate = true;
        let out = DataPointsFilter::<f64>::step_filter(&mut filter, cloud, &mut iterate);

        assert!(out.point_count() > 50);
        assert!(out.point_count() < 150);
        assert!(out.is_homogeneous());
    }

    #[test]
    fn random_sampling_redraws_each_step() {
        let points: Vec<[f64; 3]> = (0..100).map(|i| [i as f64, 0.0, 0.0]).collect();
        let cloud = cloud3(&points);

        let mut filter = RandomSamplingFilter::from_seed(0.5, 11);
        let mut iterate = true;
        let first = DataPointsFilter::<f64>::step_filter(&mut filter, cloud.clone(), &mut iterate);
        let second = DataPointsFilter::<f64>::step_filter(&mut filter, cloud, &mut iterate);
        assert_ne!(first, second);
    }

    #[test]
    fn random_sampling_keeps_descriptor_alignment() {
        let points: Vec<[f64; 3]> = (0..50).map(|i| [i as f64, 0.0, 0.0]).collect();
        let mut cloud = cloud3(&points);
        // Tag each column with its index so alignment survives filtering.
        cloud.descriptors = DMatrix::from_fn(1, 50, |_, j| j as f64);

        let mut filter = RandomSamplingFilter::from_seed(0.4, 3);
        let mut iterate = true;
        let out = DataPointsFilter::<f64>::step_filter(&mut filter, cloud, &mut iterate);

        for j in 0..out.point_count() {
            assert_relative_eq!(out.features[(0, j)], out.descriptors[(0, j)]);
        }
    }

    #[test]
    fn surface_normals_on_a_plane_point_along_z() {
        let mut points = Vec::new();
        for x in 0..5 {
            for y in 0..5 {
                points.push([x as f64, y as f64, 0.0]);
            }
        }
        let cloud = cloud3(&points);

        let mut filter = SurfaceNormalsFilter::new(5);
        let mut iterate = true;
        let out = filter.pre_filter(cloud, &mut iterate);

        assert!(iterate);
        assert_eq!(out.descriptors.nrows(), 3);
        for j in 0..out.point_count() {
            assert_relative_eq!(out.descriptors[(0, j)], 0.0, epsilon = 1e-9);
            assert_relative_eq!(out.descriptors[(1, j)], 0.0, epsilon = 1e-9);
            assert_relative_eq!(out.descriptors[(2, j)].abs(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn surface_normals_requires_enough_points() {
        let cloud = cloud3(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let mut filter = SurfaceNormalsFilter::new(5);
        let mut iterate = true;
        let out = filter.pre_filter(cloud.clone(), &mut iterate);
        assert!(!iterate);
        assert_eq!(out, cloud);
    }
}
