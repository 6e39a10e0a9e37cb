//! Pairwise distances between consensus profiles and per-row extreme neighbors.

use crate::errors::JumpRrError;
use anyhow::Result;
use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance between two feature vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(u, v)`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Cosine distance of the mean-centered vectors.
    Correlation,
    /// L2 distance.
    Euclidean,
    /// Squared L2 distance.
    Sqeuclidean,
    /// L1 distance.
    Cityblock,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Correlation => "correlation",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Sqeuclidean => "sqeuclidean",
            DistanceMetric::Cityblock => "cityblock",
        })
    }
}

/// The device that runs the heavy numeric work of a run.
///
/// Construction is the availability check: a backend that exists can compute. Callers
/// block until each operation completes.
pub trait PairwiseBackend {
    /// Human readable device description, for logs.
    fn describe(&self) -> String;

    /// Full `n x n` distance matrix between the rows of `data`.
    fn pairwise_distances(
        &self,
        data: ArrayView2<'_, f64>,
        metric: DistanceMetric,
        labels: &[&str],
    ) -> Result<Array2<f64>>;

    /// The `k` closest and `k` farthest neighbors of every row of a distance matrix.
    fn select_neighbors(&self, distances: ArrayView2<'_, f64>, k: usize) -> Result<Neighbors>;
}

/// Runs on a dedicated rayon thread pool.
pub struct CpuBackend {
    pool: rayon::ThreadPool,
}

impl CpuBackend {
    /// Build the thread pool; `None` uses every available core.
    pub fn new(num_threads: Option<usize>) -> Result<Self, JumpRrError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("jump_rr-{i}"));
        if let Some(n) = num_threads {
            if n == 0 {
                return Err(JumpRrError::DeviceUnavailable(
                    "num_threads must be positive".to_string(),
                ));
            }
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| JumpRrError::DeviceUnavailable(e.to_string()))?;
        Ok(CpuBackend { pool })
    }
}

impl PairwiseBackend for CpuBackend {
    fn describe(&self) -> String {
        format!("cpu ({} threads)", self.pool.current_num_threads())
    }

    fn pairwise_distances(
        &self,
        data: ArrayView2<'_, f64>,
        metric: DistanceMetric,
        labels: &[&str],
    ) -> Result<Array2<f64>> {
        Ok(self
            .pool
            .install(|| pairwise_distances(data, metric, labels))?)
    }

    fn select_neighbors(&self, distances: ArrayView2<'_, f64>, k: usize) -> Result<Neighbors> {
        Ok(self.pool.install(|| select_neighbors(distances, k))?)
    }
}

/// Reject `k` values that cannot be satisfied by `n_items` perturbations.
pub fn check_top_count(n_items: usize, k: usize) -> Result<(), JumpRrError> {
    if k == 0 {
        return Err(JumpRrError::ZeroTopCount);
    }
    if n_items <= 2 * k + 1 {
        return Err(JumpRrError::TooFewItems { n_items, k });
    }
    Ok(())
}

/// Rows scaled to unit length, mean-centered first when `center` is set.
///
/// Each row is divided by its largest magnitude before the norm is taken, so every
/// finite row has a finite norm.
fn unit_rows(
    data: ArrayView2<'_, f64>,
    center: bool,
    metric: DistanceMetric,
    labels: &[&str],
) -> Result<Array2<f64>, JumpRrError> {
    let mut out = data.to_owned();
    for (i, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
        let degenerate = || JumpRrError::DegenerateVector {
            id: labels.get(i).map_or_else(|| i.to_string(), |s| s.to_string()),
            metric,
        };
        if row.iter().any(|x| !x.is_finite()) {
            return Err(degenerate());
        }
        if center {
            let mean = row.mean().unwrap_or(0.0);
            row -= mean;
        }
        let scale = row.fold(0.0f64, |m, x| m.max(x.abs()));
        if scale == 0.0 || !scale.is_finite() {
            return Err(degenerate());
        }
        row /= scale;
        let norm = row.dot(&row).sqrt();
        row /= norm;
    }
    Ok(out)
}

/// `1 - u.v` for every pair of unit rows, as a single matrix product.
fn cosine_distances(unit: Array2<f64>) -> Array2<f64> {
    let mut distances = unit.dot(&unit.t());
    distances.mapv_inplace(|x| 1.0 - x);
    distances
}

type RowDistance = fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64;

fn sqeuclidean(u: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>) -> f64 {
    u.iter().zip(v).map(|(a, b)| (a - b) * (a - b)).sum()
}

fn euclidean(u: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>) -> f64 {
    sqeuclidean(u, v).sqrt()
}

fn cityblock(u: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>) -> f64 {
    u.iter().zip(v).map(|(a, b)| (a - b).abs()).sum()
}

/// Fill the distance matrix row by row, in parallel.
fn rowwise_distances(data: ArrayView2<'_, f64>, distance: RowDistance) -> Array2<f64> {
    let n = data.nrows();
    let mut distances = Array2::zeros((n, n));
    Zip::from(distances.rows_mut())
        .and(data.rows())
        .par_for_each(|mut out, u| {
            for (d, v) in out.iter_mut().zip(data.rows()) {
                *d = distance(u, v);
            }
        });
    distances
}

/// Full pairwise distance matrix between the rows of `data`.
///
/// `labels` names the rows in error messages.
pub fn pairwise_distances(
    data: ArrayView2<'_, f64>,
    metric: DistanceMetric,
    labels: &[&str],
) -> Result<Array2<f64>, JumpRrError> {
    let distances = match metric {
        DistanceMetric::Cosine => cosine_distances(unit_rows(data, false, metric, labels)?),
        DistanceMetric::Correlation => cosine_distances(unit_rows(data, true, metric, labels)?),
        DistanceMetric::Euclidean => rowwise_distances(data, euclidean),
        DistanceMetric::Sqeuclidean => rowwise_distances(data, sqeuclidean),
        DistanceMetric::Cityblock => rowwise_distances(data, cityblock),
    };
    let n = data.nrows();
    debug!("computed {n}x{n} {metric} distance matrix");
    Ok(distances)
}

/// For every subject, the positions and distances of its `k` closest then `k`
/// farthest neighbors, both in ascending distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbors {
    indices: Array2<usize>,
    distances: Array2<f64>,
}

impl Neighbors {
    /// Wrap precomputed neighbor tables, checking they describe `n_items` items.
    pub fn new(
        indices: Array2<usize>,
        distances: Array2<f64>,
        n_items: usize,
    ) -> Result<Self, JumpRrError> {
        if indices.nrows() != n_items {
            return Err(JumpRrError::MisalignedRecords {
                records: n_items,
                rows: indices.nrows(),
            });
        }
        if indices.dim() != distances.dim() {
            return Err(JumpRrError::NeighborWidth {
                expected: indices.ncols(),
                found: distances.ncols(),
            });
        }
        if let Some(&index) = indices.iter().find(|&&j| j >= n_items) {
            return Err(JumpRrError::NeighborOutOfRange { index, n_items });
        }
        Ok(Neighbors { indices, distances })
    }

    /// Number of subjects.
    pub fn n_subjects(&self) -> usize {
        self.indices.nrows()
    }

    /// Matches emitted per subject (`2k`).
    pub fn per_subject(&self) -> usize {
        self.indices.ncols()
    }

    /// Neighbor positions, one row per subject.
    pub fn indices(&self) -> ArrayView2<'_, usize> {
        self.indices.view()
    }

    /// Neighbor distances, aligned with [`Neighbors::indices`].
    pub fn distances(&self) -> ArrayView2<'_, f64> {
        self.distances.view()
    }

    /// `(subject, neighbor, distance)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.indices
            .indexed_iter()
            .map(move |((i, j), &n)| (i, n, self.distances[[i, j]]))
    }
}

/// Select the `k` smallest and `k` largest off-diagonal distances of every row.
///
/// The diagonal is skipped by position, so duplicated profiles at distance zero are
/// still reported as matches. Ties are broken by the lower index.
pub fn select_neighbors(
    distances: ArrayView2<'_, f64>,
    k: usize,
) -> Result<Neighbors, JumpRrError> {
    let n = distances.nrows();
    if distances.ncols() != n {
        return Err(JumpRrError::NeighborWidth {
            expected: n,
            found: distances.ncols(),
        });
    }
    check_top_count(n, k)?;

    let rows: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let row = distances.row(i);
            let mut order: Vec<usize> = (0..n).filter(|&j| j != i).collect();
            order.sort_unstable_by_key(|&j| (OrderedFloat(row[j]), j));
            let farthest = order.len() - k;
            order.drain(k..farthest);
            order
        })
        .collect();

    let indices = Array2::from_shape_fn((n, 2 * k), |(i, j)| rows[i][j]);
    let values = Array2::from_shape_fn((n, 2 * k), |(i, j)| distances[[i, indices[[i, j]]]]);
    Neighbors::new(indices, values, n)
}

/// Display a distance as a similarity, `round(1 - d, 3)`.
///
/// Only meaningful for distances bounded like the cosine distance. Apply after
/// selection; ranking is done on raw distances.
pub fn distance_to_similarity(distance: f64) -> f64 {
    ((1.0 - distance) * 1000.0).round() / 1000.0
}
