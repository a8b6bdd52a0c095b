//! Weighted least squares per cluster.

use super::neighborhood::LocalSummary;
use crate::cluster::metric;
use crate::error::{Error, Result};
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

/// Affine model of one region: `y = β_0 + Σ β_k x_k`.
#[derive(Debug, Clone)]
pub struct LocalModel {
    /// `[intercept, slope_1, .., slope_n]`.
    pub coefficients: Vec<f64>,
    /// Observations (window owners) assigned to this region.
    pub members: Vec<usize>,
    /// Rows used in the fit (window samples of every member, overlaps included).
    pub n_rows: usize,
}

impl LocalModel {
    /// The intercept `β_0`.
    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// One slope per predictor.
    pub fn slopes(&self) -> &[f64] {
        &self.coefficients[1..]
    }

    /// Model value at `x` (one entry per predictor).
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.slopes().len());
        self.intercept()
            + self
                .slopes()
                .iter()
                .zip(x)
                .map(|(b, v)| b * v)
                .sum::<f64>()
    }
}

/// Fits one [`LocalModel`] per cluster from the regression windows of its members.
///
/// Every sample in a member's window becomes one row, weighted by the member's
/// window weight. Weights are rescaled by the largest weight in the cluster,
/// which leaves the solution unchanged and keeps tiny weights away from underflow.
#[derive(Debug, Clone, Default)]
pub struct ClusterRegressor;

impl ClusterRegressor {
    /// Create a regressor.
    pub fn new() -> Self {
        Self
    }

    /// Fit `k` models. `labels[i]` is the cluster of `summaries[i]`.
    pub fn fit(
        &self,
        samples: &[Vec<f64>],
        targets: &[f64],
        summaries: &[LocalSummary],
        labels: &[usize],
        k: usize,
    ) -> Result<Vec<LocalModel>> {
        if samples.is_empty() || summaries.is_empty() {
            return Err(Error::EmptyInput);
        }
        if targets.len() != samples.len() {
            return Err(Error::InvalidParameter {
                name: "targets",
                message: "must supply one target per sample",
            });
        }
        if labels.len() != summaries.len() {
            return Err(Error::InvalidParameter {
                name: "labels",
                message: "must supply one label per summary",
            });
        }

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (i, &l) in labels.iter().enumerate() {
            members
                .get_mut(l)
                .ok_or(Error::InvalidParameter {
                    name: "labels",
                    message: "label out of range",
                })?
                .push(i);
        }

        let n = samples[0].len();
        members
            .into_iter()
            .enumerate()
            .map(|(j, owners)| self.fit_cluster(j, n, samples, targets, summaries, owners))
            .collect()
    }

    fn fit_cluster(
        &self,
        cluster: usize,
        n: usize,
        samples: &[Vec<f64>],
        targets: &[f64],
        summaries: &[LocalSummary],
        owners: Vec<usize>,
    ) -> Result<LocalModel> {
        if owners.is_empty() {
            return Err(Error::InvalidParameter {
                name: "labels",
                message: "every cluster needs at least one member",
            });
        }

        let max_weight = owners
            .iter()
            .map(|&i| summaries[i].weight)
            .fold(0.0_f64, f64::max);
        if max_weight <= 0.0 || !max_weight.is_finite() {
            return Err(Error::InvalidParameter {
                name: "weight",
                message: "window weights must be positive and finite",
            });
        }

        let p = n + 1;
        let mut normal = DMatrix::<f64>::zeros(p, p);
        let mut rhs = DVector::<f64>::zeros(p);
        let mut rows = 0;

        for &i in &owners {
            let w = summaries[i].weight / max_weight;
            for &s in &summaries[i].members {
                let x = samples.get(s).ok_or(Error::InvalidParameter {
                    name: "summaries",
                    message: "window member out of range",
                })?;
                if x.len() != n {
                    return Err(Error::DimensionMismatch {
                        expected: n,
                        found: x.len(),
                    });
                }
                let row = DVector::from_fn(p, |r, _| if r == 0 { 1.0 } else { x[r - 1] });
                normal += (&row * row.transpose()) * w;
                rhs += &row * (w * targets[s]);
                rows += 1;
            }
        }

        let beta = metric::solve_spd(normal, &rhs, 0.0, || {
            format!("weighted normal equations of cluster {cluster}")
        })?;
        trace!("cluster {} coefficients {:?}", cluster, beta.as_slice());
        debug!(
            "cluster {}: {} members, {} weighted rows",
            cluster,
            owners.len(),
            rows
        );

        Ok(LocalModel {
            coefficients: beta.iter().copied().collect(),
            members: owners,
            n_rows: rows,
        })
    }
}
