//! Nearest-neighbor matchers.
//!
//! Two implementations of the [`Matcher`](crate::core::Matcher) contract: an
//! exhaustive scan usable at any dimensionality, and a kd-tree index built
//! once over the pre-filtered reference. Both report **squared** Euclidean
//! distances over the spatial feature rows.

use std::cmp::Ordering;

use kiddo::float::kdtree::KdTree;
use kiddo::SquaredEuclidean;
use nalgebra::{convert, DMatrix, RealField};

use crate::core::Matcher;
use crate::types::{DataPoints, Matches};
use crate::utils::to_f64;

/// Exhaustive nearest-neighbor scan, `O(n_reading * n_reference)` per
/// iteration. Works for any spatial dimensionality; ties resolve to the
/// highest reference index.
pub struct BruteForceMatcher {
    knn: usize,
}

impl Default for BruteForceMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BruteForceMatcher {
    pub fn new() -> Self {
        Self { knn: 1 }
    }

    /// Request `knn` neighbors per reading point instead of one.
    pub fn with_knn(knn: usize) -> Self {
        debug_assert!(knn > 0, "at least one neighbor per point is required");
        Self { knn }
    }
}

impl<T: RealField + Copy> Matcher<T> for BruteForceMatcher {
    fn init(
        &mut self,
        _filtered_reading: &DataPoints<T>,
        _filtered_reference: &DataPoints<T>,
        _iterate: &mut bool,
    ) {
        // No acceleration structure to build.
    }

    fn find_closests(
        &mut self,
        filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        iterate: &mut bool,
    ) -> Matches<T> {
        let d = filtered_reading.dimension();
        let n_reference = filtered_reference.point_count();
        if n_reference == 0 || filtered_reading.point_count() == 0 {
            *iterate = false;
            return Matches::new(
                DMatrix::from_element(self.knn, 0, 0usize),
                DMatrix::from_element(self.knn, 0, T::zero()),
            );
        }

        let n = filtered_reading.point_count();
        let mut ids = DMatrix::from_element(self.knn, n, 0usize);
        let mut dists = DMatrix::from_element(self.knn, n, T::zero());

        for j in 0..n {
            if self.knn == 1 {
                let mut best_id = 0usize;
                let mut best_dist = T::max_value().unwrap_or_else(T::one);
                for id in 0..n_reference {
                    let dist = squared_distance(filtered_reading, j, filtered_reference, id, d);
                    if dist <= best_dist {
                        best_dist = dist;
                        best_id = id;
                    }
                }
                ids[(0, j)] = best_id;
                dists[(0, j)] = best_dist;
            } else {
                let mut candidates: Vec<(T, usize)> = (0..n_reference)
                    .map(|id| {
                        (
                            squared_distance(filtered_reading, j, filtered_reference, id, d),
                            id,
                        )
                    })
                    .collect();
                candidates.sort_unstable_by(|a, b| {
                    a.0.partial_cmp(&b.0)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| b.1.cmp(&a.1))
                });
                for (i, &(dist, id)) in candidates.iter().take(self.knn).enumerate() {
                    ids[(i, j)] = id;
                    dists[(i, j)] = dist;
                }
                // A short reference repeats its furthest neighbor.
                if n_reference < self.knn {
                    for i in n_reference..self.knn {
                        ids[(i, j)] = ids[(n_reference - 1, j)];
                        dists[(i, j)] = dists[(n_reference - 1, j)];
                    }
                }
            }
        }

        Matches::new(ids, dists)
    }
}

fn squared_distance<T: RealField + Copy>(
    reading: &DataPoints<T>,
    j: usize,
    reference: &DataPoints<T>,
    id: usize,
    d: usize,
) -> T {
    let mut sum = T::zero();
    for i in 0..d {
        let diff = reading.features[(i, j)] - reference.features[(i, id)];
        sum += diff * diff;
    }
    sum
}

/// Spatial index over the reference cloud, dimension-adapted at build time.
///
/// Shared between the kd-tree matcher and the normal-estimation filter.
pub(crate) enum KdIndex {
    D2(KdTree<f64, usize, 2, 32, u16>),
    D3(KdTree<f64, usize, 3, 32, u16>),
}

impl KdIndex {
    /// Index the spatial rows of a feature block.
    pub(crate) fn build<T: RealField + Copy>(cloud: &DataPoints<T>) -> Self {
        match cloud.dimension() {
            2 => {
                let mut tree = KdTree::new();
                for j in 0..cloud.point_count() {
                    tree.add(
                        &[
                            to_f64(cloud.features[(0, j)]),
                            to_f64(cloud.features[(1, j)]),
                        ],
                        j,
                    );
                }
                KdIndex::D2(tree)
            }
            _ => {
                let mut tree = KdTree::new();
                for j in 0..cloud.point_count() {
                    tree.add(
                        &[
                            to_f64(cloud.features[(0, j)]),
                            to_f64(cloud.features[(1, j)]),
                            to_f64(cloud.features[(2, j)]),
                        ],
                        j,
                    );
                }
                KdIndex::D3(tree)
            }
        }
    }

    /// The `knn` nearest items to the `j`-th column of `cloud`, as
    /// `(squared distance, item)` pairs sorted by ascending distance.
    pub(crate) fn nearest<T: RealField + Copy>(
        &self,
        cloud: &DataPoints<T>,
        j: usize,
        knn: usize,
    ) -> Vec<(f64, usize)> {
        match self {
            KdIndex::D2(tree) => {
                let query = [
                    to_f64(cloud.features[(0, j)]),
                    to_f64(cloud.features[(1, j)]),
                ];
                tree.nearest_n::<SquaredEuclidean>(&query, knn)
                    .into_iter()
                    .map(|neighbor| (neighbor.distance, neighbor.item))
                    .collect()
            }
            KdIndex::D3(tree) => {
                let query = [
                    to_f64(cloud.features[(0, j)]),
                    to_f64(cloud.features[(1, j)]),
                    to_f64(cloud.features[(2, j)]),
                ];
                tree.nearest_n::<SquaredEuclidean>(&query, knn)
                    .into_iter()
                    .map(|neighbor| (neighbor.distance, neighbor.item))
                    .collect()
            }
        }
    }
}

/// Kd-tree matcher: builds its index once in `init` over the pre-filtered
/// reference and reuses it every iteration.
pub struct KdTreeMatcher {
    knn: usize,
    index: Option<KdIndex>,
}

impl Default for KdTreeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl KdTreeMatcher {
    pub fn new() -> Self {
        Self {
            knn: 1,
            index: None,
        }
    }

    /// Request `knn` neighbors per reading point instead of one.
    pub fn with_knn(knn: usize) -> Self {
        debug_assert!(knn > 0, "at least one neighbor per point is required");
        Self { knn, index: None }
    }
}

impl<T: RealField + Copy> Matcher<T> for KdTreeMatcher {
    fn init(
        &mut self,
        _filtered_reading: &DataPoints<T>,
        filtered_reference: &DataPoints<T>,
        iterate: &mut bool,
    ) {
        if filtered_reference.point_count() == 0 {
            *iterate = false;
            self.index = None;
            return;
        }
        self.index = Some(KdIndex::build(filtered_reference));
    }

    fn find_closests(
        &mut self,
        filtered_reading: &DataPoints<T>,
        _filtered_reference: &DataPoints<T>,
        iterate: &mut bool,
    ) -> Matches<T> {
        let index = match &self.index {
            Some(index) => index,
            None => {
                *iterate = false;
                return Matches::new(
                    DMatrix::from_element(self.knn, 0, 0usize),
                    DMatrix::from_element(self.knn, 0, T::zero()),
                );
            }
        };

        let n = filtered_reading.point_count();
        let mut ids = DMatrix::from_element(self.knn, n, 0usize);
        let mut dists = DMatrix::from_element(self.knn, n, T::zero());

        for j in 0..n {
            let neighbors = index.nearest(filtered_reading, j, self.knn);
            for i in 0..self.knn {
                // A short reference repeats its furthest neighbor.
                let (dist, id) = neighbors
                    .get(i)
                    .or_else(|| neighbors.last())
                    .copied()
                    .unwrap_or((0.0, 0));
                ids[(i, j)] = id;
                dists[(i, j)] = convert(dist);
            }
        }

        Matches::new(ids, dists)
    }
}
