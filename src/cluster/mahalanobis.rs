//! K-means with a per-observation Mahalanobis metric.
//!
//! # The Algorithm
//!
//! Each observation `i` carries a feature vector `x_i` and its own symmetric
//! positive-definite precision matrix `M_i`. Observation `i` is always judged by
//! its own metric:
//!
//! ```text
//! d²(x_i, c) = (x_i − c)ᵀ · M_i · (x_i − c)
//! ```
//!
//! Metrics are never pooled across observations when measuring a point against a
//! centroid.
//!
//! ## Seeding (k-means++ under the observation metrics)
//!
//! 1. The first centroid is an observation drawn uniformly.
//! 2. Every further centroid is an observation drawn with probability
//!    proportional to its minimum `d²` to the centroids chosen so far.
//!    Chosen observations are never drawn twice.
//! 3. If no unchosen observation carries any mass (duplicates), the draw falls
//!    back to uniform over the unchosen observations.
//!
//! ## Lloyd iterations
//!
//! - **Update**: each centroid becomes the precision-weighted mean of its members,
//!   `c_j = (Σ M_i)⁻¹ · Σ M_i x_i`. With equal metrics this is the arithmetic mean.
//! - **Assign**: each observation moves to the centroid with the smallest `d²`
//!   (ties go to the lowest cluster index).
//!
//! The loop stops once an assignment pass changes nothing, or after `max_iter`
//! passes. Hitting the cap is not an error: [`MahalanobisKmeansFit::converged`]
//! reports it.
//!
//! Both steps minimize the same objective `J = Σ_i d²(x_i, c_{label(i)})`, so `J`
//! never increases from one pass to the next.
//!
//! ## Failure modes
//!
//! - A cluster that loses all members is fatal for the call
//!   ([`Error::DegenerateCluster`]). Nothing is reseeded, so a given seed always
//!   reproduces the same outcome; retry with another seed.
//! - A singular precision sum is [`Error::SingularMatrix`] unless
//!   [`MahalanobisKmeans::with_regularization`] opts into a ridge term.
//! - A single-member cluster solves against that member's own precision matrix,
//!   which is sensitive to poorly conditioned metrics.
//!
//! # Predicting new points
//!
//! [`MahalanobisKmeansFit::predict`] uses plain squared Euclidean distance to the
//! fitted centroids, because out-of-sample points carry no metric of their own.
//! This differs from the metric used while fitting; callers with a metric per
//! point should use [`MahalanobisKmeansFit::predict_with_metrics`].

use super::metric::{self, mahalanobis_sq};
use super::traits::Clustering;
use super::util::{self, Draw};
use crate::error::{Error, Result};
use log::{debug, info, trace, warn};
use nalgebra::{DMatrix, DVector};
use rand::prelude::*;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Mahalanobis k-means++ clusterer (parameters only).
#[derive(Debug, Clone)]
pub struct MahalanobisKmeans {
    /// Number of clusters.
    k: usize,
    /// Maximum number of update/assign passes.
    max_iter: usize,
    /// Seed for the per-call RNG.
    seed: u64,
    /// Ridge added to every precision sum before solving (0 = off).
    regularization: f64,
    /// Validate symmetry and positive-definiteness of every metric up front.
    validate_metrics: bool,
}

impl MahalanobisKmeans {
    /// Create a clusterer for `k` clusters.
    ///
    /// Defaults: `max_iter = 1000`, `seed = 0`, no regularization, no metric validation.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 1000,
            seed: 0,
            regularization: 0.0,
            validate_metrics: false,
        }
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the seed used for k-means++ seeding.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Add `lambda · I` to every cluster's precision sum before solving.
    ///
    /// Off by default; a singular sum is then reported as [`Error::SingularMatrix`].
    pub fn with_regularization(mut self, lambda: f64) -> Self {
        self.regularization = lambda;
        self
    }

    /// Check every metric for symmetry and positive-definiteness before fitting.
    pub fn with_validate_metrics(mut self, validate: bool) -> Self {
        self.validate_metrics = validate;
        self
    }

    /// Fit on `data` (one feature vector per observation) with one precision
    /// matrix per observation in `metrics`.
    ///
    /// The RNG is created from the configured seed for this call only.
    pub fn fit(&self, data: &[Vec<f64>], metrics: &[DMatrix<f64>]) -> Result<MahalanobisKmeansFit> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.fit_with_rng(data, metrics, &mut rng)
    }

    /// Like [`fit`](Self::fit), drawing the seeding randomness from `rng`.
    pub fn fit_with_rng<R: Rng + ?Sized>(
        &self,
        data: &[Vec<f64>],
        metrics: &[DMatrix<f64>],
        rng: &mut R,
    ) -> Result<MahalanobisKmeansFit> {
        let problem = self.validate(data, metrics)?;
        let seeds = self.seed_indices(&problem, rng)?;
        debug!("seeded {} centroids at observations {:?}", self.k, seeds);

        let centroids: Vec<Vec<f64>> = seeds.iter().map(|&i| data[i].clone()).collect();
        self.lloyd(&problem, centroids)
    }

    /// Skip seeding and iterate from the supplied `centroids` (`k` rows).
    ///
    /// Starting from the centroids of a converged fit reproduces its labels in one pass.
    pub fn fit_from_centroids(
        &self,
        data: &[Vec<f64>],
        metrics: &[DMatrix<f64>],
        centroids: &[Vec<f64>],
    ) -> Result<MahalanobisKmeansFit> {
        let problem = self.validate(data, metrics)?;
        if centroids.len() != self.k {
            return Err(Error::InvalidParameter {
                name: "centroids",
                message: "must supply exactly k centroids",
            });
        }
        for c in centroids {
            if c.len() != problem.dim {
                return Err(Error::DimensionMismatch {
                    expected: problem.dim,
                    found: c.len(),
                });
            }
        }
        self.lloyd(&problem, centroids.to_vec())
    }

    fn validate<'a>(&self, data: &'a [Vec<f64>], metrics: &'a [DMatrix<f64>]) -> Result<Problem<'a>> {
        let n = data.len();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        if self.k == 0 || self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iter",
                message: "must be at least 1",
            });
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(Error::InvalidParameter {
                name: "regularization",
                message: "must be finite and non-negative",
            });
        }
        if metrics.len() != n {
            return Err(Error::InvalidParameter {
                name: "metrics",
                message: "must supply one matrix per observation",
            });
        }

        let dim = data[0].len();
        if dim == 0 {
            return Err(Error::InvalidParameter {
                name: "dimension",
                message: "must be at least 1",
            });
        }
        for point in data {
            if point.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    found: point.len(),
                });
            }
            if point.iter().any(|v| !v.is_finite()) {
                return Err(Error::InvalidParameter {
                    name: "data",
                    message: "contains non-finite values",
                });
            }
        }
        for (i, m) in metrics.iter().enumerate() {
            if self.validate_metrics {
                metric::validate_metric(i, m, dim)?;
            } else {
                metric::check_shape(m, dim)?;
            }
        }

        Ok(Problem { data, metrics, dim })
    }

    /// k-means++ seeding; returns the observation index of each seed in draw order.
    fn seed_indices<R: Rng + ?Sized>(&self, p: &Problem<'_>, rng: &mut R) -> Result<Vec<usize>> {
        let n = p.data.len();
        let mut taken = vec![false; n];
        let mut seeds = Vec::with_capacity(self.k);

        let first = rng.random_range(0..n);
        taken[first] = true;
        seeds.push(first);

        let mut nearest = vec![f64::INFINITY; n];
        lower_seeding_mass(p, &mut nearest, first);

        while seeds.len() < self.k {
            let draw = util::draw_index(rng, &nearest, &taken).ok_or(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            })?;
            if let Draw::Uniform(i) = draw {
                warn!(
                    "seed {}: no remaining mass, drew observation {} uniformly",
                    seeds.len(),
                    i
                );
            }

            let next = draw.index();
            taken[next] = true;
            seeds.push(next);

            lower_seeding_mass(p, &mut nearest, next);
        }

        Ok(seeds)
    }

    fn lloyd(&self, p: &Problem<'_>, mut centroids: Vec<Vec<f64>>) -> Result<MahalanobisKmeansFit> {
        let (mut labels, initial) = assign(p, &centroids);
        debug!("initial assignment distortion {:.6e}", initial);

        let mut history = Vec::new();
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iter {
            centroids = self.update_centroids(p, &labels, iterations)?;
            let (next, distortion) = assign(p, &centroids);
            iterations += 1;
            history.push(distortion);

            let changed = labels.iter().zip(&next).filter(|(a, b)| a != b).count();
            debug!(
                "iteration {}: {} labels changed, distortion {:.6e}",
                iterations, changed, distortion
            );
            labels = next;

            if changed == 0 {
                converged = true;
                break;
            }
        }

        if converged {
            info!("converged after {} iterations", iterations);
        } else {
            warn!(
                "stopped at max_iter = {} before the assignment stabilized",
                self.max_iter
            );
        }

        // A pass that hit the cap may have emptied a cluster after the last update.
        let sizes = cluster_sizes(&labels, self.k);
        if let Some(empty) = sizes.iter().position(|&s| s == 0) {
            return Err(Error::DegenerateCluster {
                cluster: empty,
                iteration: iterations,
            });
        }

        let distortion = history.last().copied().unwrap_or(initial);
        Ok(MahalanobisKmeansFit {
            labels,
            centroids,
            iterations,
            converged,
            distortion,
            distortion_history: history,
        })
    }

    /// Precision-weighted mean of every cluster.
    ///
    /// `iteration` is the number of completed passes; it is only used for error reporting.
    fn update_centroids(
        &self,
        p: &Problem<'_>,
        labels: &[usize],
        iteration: usize,
    ) -> Result<Vec<Vec<f64>>> {
        let d = p.dim;
        let mut precision_sums = vec![DMatrix::<f64>::zeros(d, d); self.k];
        let mut weighted_sums = vec![DVector::<f64>::zeros(d); self.k];
        let mut counts = vec![0usize; self.k];

        for (i, &j) in labels.iter().enumerate() {
            let x = DVector::from_column_slice(&p.data[i]);
            weighted_sums[j] += &p.metrics[i] * x;
            precision_sums[j] += &p.metrics[i];
            counts[j] += 1;
        }

        let mut centroids = Vec::with_capacity(self.k);
        for (j, (sum_m, sum_mx)) in precision_sums.into_iter().zip(weighted_sums).enumerate() {
            if counts[j] == 0 {
                return Err(Error::DegenerateCluster {
                    cluster: j,
                    iteration,
                });
            }
            let c = metric::solve_spd(sum_m, &sum_mx, self.regularization, || {
                format!("precision sum of cluster {j} ({} members)", counts[j])
            })?;
            trace!("cluster {} ({} members) centroid {:?}", j, counts[j], c.as_slice());
            centroids.push(c.iter().copied().collect());
        }
        Ok(centroids)
    }
}

impl Clustering for MahalanobisKmeans {
    fn fit_predict(&self, data: &[Vec<f64>], metrics: &[DMatrix<f64>]) -> Result<Vec<usize>> {
        self.fit(data, metrics).map(|fit| fit.labels)
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}

/// Validated view over one call's inputs.
struct Problem<'a> {
    data: &'a [Vec<f64>],
    metrics: &'a [DMatrix<f64>],
    dim: usize,
}

/// Lower `nearest[i]` to the d² from observation `i` to observation `seed`, measured
/// under `M_i`, so it stays the minimum over every seed chosen so far.
fn lower_seeding_mass(p: &Problem<'_>, nearest: &mut [f64], seed: usize) {
    for (i, mass) in nearest.iter_mut().enumerate() {
        let d = mahalanobis_sq(&p.data[i], &p.data[seed], &p.metrics[i]);
        if d < *mass {
            *mass = d;
        }
    }
}

/// Nearest centroid for every observation under its own metric, plus the total distortion.
fn assign(p: &Problem<'_>, centroids: &[Vec<f64>]) -> (Vec<usize>, f64) {
    let nearest = |i: usize| -> (usize, f64) {
        let dists: Vec<f64> = centroids
            .iter()
            .map(|c| mahalanobis_sq(&p.data[i], c, &p.metrics[i]))
            .collect();
        let j = util::argmin_first(&dists);
        (j, dists[j])
    };

    #[cfg(feature = "parallel")]
    let rows: Vec<(usize, f64)> = (0..p.data.len()).into_par_iter().map(nearest).collect();
    #[cfg(not(feature = "parallel"))]
    let rows: Vec<(usize, f64)> = (0..p.data.len()).map(nearest).collect();

    // Summed in index order so both paths agree bit for bit.
    let distortion = rows.iter().map(|&(_, d)| d).sum::<f64>();
    (rows.into_iter().map(|(j, _)| j).collect(), distortion)
}

fn cluster_sizes(labels: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; k];
    for &l in labels {
        sizes[l] += 1;
    }
    sizes
}

/// Result of [`MahalanobisKmeans::fit`].
#[derive(Debug, Clone)]
pub struct MahalanobisKmeansFit {
    labels: Vec<usize>,
    centroids: Vec<Vec<f64>>,
    iterations: usize,
    converged: bool,
    distortion: f64,
    distortion_history: Vec<f64>,
}

impl MahalanobisKmeansFit {
    /// Cluster index of every observation, in input order.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Consume the fit and return the labels.
    pub fn into_labels(self) -> Vec<usize> {
        self.labels
    }

    /// One centroid per cluster.
    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }

    /// Number of clusters.
    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    /// Update/assign passes actually performed, including the one that detected convergence.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// False when the iteration cap was reached while labels were still changing.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Total distortion `Σ_i d²(x_i, c_{label(i)})` after the last pass.
    pub fn distortion(&self) -> f64 {
        self.distortion
    }

    /// Distortion after each pass, in order.
    pub fn distortion_history(&self) -> &[f64] {
        &self.distortion_history
    }

    /// Number of observations per cluster.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        cluster_sizes(&self.labels, self.centroids.len())
    }

    /// Nearest centroid by squared Euclidean distance.
    ///
    /// Note that fitting used the per-observation metric; see
    /// [`predict_with_metrics`](Self::predict_with_metrics).
    pub fn predict(&self, points: &[Vec<f64>]) -> Result<Vec<usize>> {
        predict(points, &self.centroids)
    }

    /// Nearest centroid by `d²` under each point's own metric.
    pub fn predict_with_metrics(
        &self,
        points: &[Vec<f64>],
        metrics: &[DMatrix<f64>],
    ) -> Result<Vec<usize>> {
        if metrics.len() != points.len() {
            return Err(Error::InvalidParameter {
                name: "metrics",
                message: "must supply one matrix per point",
            });
        }
        let dim = centroid_dim(&self.centroids)?;
        points
            .iter()
            .zip(metrics)
            .map(|(x, m)| {
                check_point(x, dim)?;
                metric::check_shape(m, dim)?;
                let dists: Vec<f64> = self
                    .centroids
                    .iter()
                    .map(|c| mahalanobis_sq(x, c, m))
                    .collect();
                Ok(util::argmin_first(&dists))
            })
            .collect()
    }
}

/// Assign each point to the nearest of `centroids` by squared Euclidean distance.
pub fn predict(points: &[Vec<f64>], centroids: &[Vec<f64>]) -> Result<Vec<usize>> {
    let dim = centroid_dim(centroids)?;
    points
        .iter()
        .map(|x| {
            check_point(x, dim)?;
            let dists: Vec<f64> = centroids
                .iter()
                .map(|c| util::squared_euclidean(x, c))
                .collect();
            Ok(util::argmin_first(&dists))
        })
        .collect()
}

/// Total distortion `Σ_i d²(x_i, c_{labels[i]})` under each observation's own metric.
pub fn distortion(
    data: &[Vec<f64>],
    metrics: &[DMatrix<f64>],
    centroids: &[Vec<f64>],
    labels: &[usize],
) -> Result<f64> {
    if metrics.len() != data.len() || labels.len() != data.len() {
        return Err(Error::InvalidParameter {
            name: "labels",
            message: "data, metrics and labels must have the same length",
        });
    }
    let dim = centroid_dim(centroids)?;
    let mut total = 0.0;
    for ((x, m), &l) in data.iter().zip(metrics).zip(labels) {
        check_point(x, dim)?;
        metric::check_shape(m, dim)?;
        let c = centroids.get(l).ok_or(Error::InvalidParameter {
            name: "labels",
            message: "label out of range",
        })?;
        total += mahalanobis_sq(x, c, m);
    }
    Ok(total)
}

fn centroid_dim(centroids: &[Vec<f64>]) -> Result<usize> {
    let first = centroids.first().ok_or(Error::EmptyInput)?;
    for c in centroids {
        if c.len() != first.len() {
            return Err(Error::DimensionMismatch {
                expected: first.len(),
                found: c.len(),
            });
        }
    }
    Ok(first.len())
}

fn check_point(x: &[f64], dim: usize) -> Result<()> {
    if x.len() != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            found: x.len(),
        });
    }
    Ok(())
}
