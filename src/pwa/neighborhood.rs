//! Local regression windows.
//!
//! For every sample the summarizer takes its `window` nearest samples (the sample
//! itself included), fits an affine model by least squares, and condenses the
//! result into:
//!
//! - a feature vector `ξ = [θ, m]`: the local coefficients (slopes, then
//!   intercept) followed by the window mean, `d = 2n + 1` entries for `n`
//!   predictors
//! - a covariance `R = blockdiag(V, Q)`, where `V = SSR/(c − n − 1) · (ΦᵀΦ)⁻¹`
//!   is the coefficient covariance and `Q = Σ (x − m)(x − m)ᵀ` the window scatter
//! - its precision `R⁻¹`, the metric the clustering core consumes
//! - a weight `w = 1 / √((2π)^d · det R)` for the per-cluster regression

use crate::cluster::metric;
use crate::error::{Error, Result};
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Relative SSR below which a window counts as fit exactly.
const EXACT_FIT_TOLERANCE: f64 = 1e-24;

/// Summary of one sample's regression window.
#[derive(Debug, Clone)]
pub struct LocalSummary {
    /// Sample indices in the window, nearest first (the sample itself leads).
    pub members: Vec<usize>,
    /// Feature vector `[θ, m]`.
    pub feature: Vec<f64>,
    /// `R = blockdiag(V, Q)`.
    pub covariance: DMatrix<f64>,
    /// `R⁻¹`.
    pub precision: DMatrix<f64>,
    /// `1 / √((2π)^d · det R)`.
    pub weight: f64,
}

impl LocalSummary {
    /// Local coefficients: one slope per predictor, then the intercept.
    ///
    /// # Panics
    ///
    /// Panics if `feature` is empty. Summaries built by [`NeighborhoodSummarizer`]
    /// always hold `2n + 1` entries.
    pub fn coefficients(&self) -> &[f64] {
        let n = (self.feature.len() - 1) / 2;
        &self.feature[..=n]
    }

    /// Mean of the window's samples.
    ///
    /// # Panics
    ///
    /// Panics if `feature` is empty.
    pub fn centroid(&self) -> &[f64] {
        let n = (self.feature.len() - 1) / 2;
        &self.feature[n + 1..]
    }
}

/// Builds a [`LocalSummary`] per sample from its nearest neighbors.
#[derive(Debug, Clone)]
pub struct NeighborhoodSummarizer {
    /// Samples per window.
    window: usize,
    /// Added to the diagonal of `R` before inverting it (0 = off).
    ridge: f64,
}

impl NeighborhoodSummarizer {
    /// Summarizer with `window` samples per regression window.
    pub fn new(window: usize) -> Self {
        Self { window, ridge: 0.0 }
    }

    /// Add `ridge · I` to every covariance before inversion.
    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }

    /// Window size.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Summarize every sample. `targets[i]` is the response observed at `samples[i]`.
    pub fn summarize(&self, samples: &[Vec<f64>], targets: &[f64]) -> Result<Vec<LocalSummary>> {
        let n_samples = samples.len();
        if n_samples == 0 {
            return Err(Error::EmptyInput);
        }
        if targets.len() != n_samples {
            return Err(Error::InvalidParameter {
                name: "targets",
                message: "must supply one target per sample",
            });
        }
        let n = samples[0].len();
        if n == 0 {
            return Err(Error::InvalidParameter {
                name: "dimension",
                message: "must be at least 1",
            });
        }
        for s in samples {
            if s.len() != n {
                return Err(Error::DimensionMismatch {
                    expected: n,
                    found: s.len(),
                });
            }
        }
        if self.window <= n + 1 {
            return Err(Error::InvalidParameter {
                name: "window",
                message: "must exceed the number of predictors plus one",
            });
        }
        if self.window > n_samples {
            return Err(Error::InvalidParameter {
                name: "window",
                message: "must not exceed the number of samples",
            });
        }
        if !self.ridge.is_finite() || self.ridge < 0.0 {
            return Err(Error::InvalidParameter {
                name: "ridge",
                message: "must be finite and non-negative",
            });
        }

        let summaries = (0..n_samples)
            .map(|i| {
                let members = self.nearest(samples, i);
                self.summarize_window(i, samples, targets, members)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "summarized {} samples with window {} (feature dim {})",
            n_samples,
            self.window,
            2 * n + 1
        );
        Ok(summaries)
    }

    /// The `window` nearest samples to `samples[i]`, ties in index order.
    fn nearest(&self, samples: &[Vec<f64>], i: usize) -> Vec<usize> {
        let dists: Vec<f64> = samples
            .iter()
            .map(|s| {
                s.iter()
                    .zip(&samples[i])
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
            })
            .collect();
        let mut order: Vec<usize> = (0..samples.len()).collect();
        // `i` leads its duplicates; other ties keep index order.
        order.sort_by(|&a, &b| {
            dists[a]
                .total_cmp(&dists[b])
                .then_with(|| (a != i).cmp(&(b != i)))
        });
        order.truncate(self.window);
        order
    }

    fn summarize_window(
        &self,
        i: usize,
        samples: &[Vec<f64>],
        targets: &[f64],
        members: Vec<usize>,
    ) -> Result<LocalSummary> {
        let n = samples[i].len();
        let c = members.len();
        let d = 2 * n + 1;

        // Design matrix rows: [x_1 .. x_n, 1].
        let phi = DMatrix::from_fn(c, n + 1, |r, col| {
            if col < n {
                samples[members[r]][col]
            } else {
                1.0
            }
        });
        let y = DVector::from_iterator(c, members.iter().map(|&j| targets[j]));

        let gram = phi.transpose() * &phi;
        let gram_inv = metric::invert_spd(&gram, || format!("local design of sample {i}"))?;
        let theta = &gram_inv * (phi.transpose() * &y);

        let residual = &y - &phi * &theta;
        let ssr = residual.dot(&residual);
        // An exact fit leaves only rounding noise in SSR; V would be numerically zero.
        if self.ridge == 0.0 && ssr <= EXACT_FIT_TOLERANCE * y.dot(&y) {
            return Err(Error::SingularMatrix {
                context: format!("window of sample {i} is fit exactly"),
            });
        }
        let v = &gram_inv * (ssr / (c - n - 1) as f64);

        let mut mean = DVector::<f64>::zeros(n);
        for &j in &members {
            mean += DVector::from_column_slice(&samples[j]);
        }
        mean /= c as f64;

        let mut scatter = DMatrix::<f64>::zeros(n, n);
        for &j in &members {
            let dx = DVector::from_column_slice(&samples[j]) - &mean;
            scatter += &dx * dx.transpose();
        }

        let mut covariance = DMatrix::<f64>::zeros(d, d);
        covariance.view_mut((0, 0), (n + 1, n + 1)).copy_from(&v);
        covariance.view_mut((n + 1, n + 1), (n, n)).copy_from(&scatter);
        if self.ridge > 0.0 {
            for k in 0..d {
                covariance[(k, k)] += self.ridge;
            }
        }

        let precision = metric::invert_spd(&covariance, || format!("covariance of sample {i}"))?;
        let det = covariance.determinant();
        if det <= 0.0 || !det.is_finite() {
            return Err(Error::SingularMatrix {
                context: format!("covariance of sample {i} has determinant {det:e}"),
            });
        }
        let weight = 1.0 / ((2.0 * std::f64::consts::PI).powi(d as i32) * det).sqrt();

        let mut feature = Vec::with_capacity(d);
        feature.extend(theta.iter().copied());
        feature.extend(mean.iter().copied());

        Ok(LocalSummary {
            members,
            feature,
            covariance,
            precision,
            weight,
        })
    }
}

impl Default for NeighborhoodSummarizer {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwa::process::{SampleBounds, Target};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use approx::assert_abs_diff_eq;

    /// y = 2x + 1 with an alternating wiggle, so no window is exactly linear.
    fn wiggly_line(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let samples: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        let targets = (0..n)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                2.0 * i as f64 + 1.0 + 0.1 * sign
            })
            .collect();
        (samples, targets)
    }

    #[test]
    fn windows_start_with_the_sample_itself() {
        let (samples, targets) = wiggly_line(8);
        let summaries = NeighborhoodSummarizer::new(3).summarize(&samples, &targets).unwrap();

        assert_eq!(summaries.len(), 8);
        for (i, s) in summaries.iter().enumerate() {
            assert_eq!(s.members[0], i);
            assert_eq!(s.members.len(), 3);
        }
        assert_eq!(summaries[0].members, vec![0, 1, 2]);
        assert_eq!(summaries[4].members, vec![4, 3, 5]);
    }

    #[test]
    fn local_fit_recovers_the_line() {
        let (samples, targets) = wiggly_line(8);
        let summaries = NeighborhoodSummarizer::new(3).summarize(&samples, &targets).unwrap();

        for s in &summaries {
            assert_eq!(s.feature.len(), 3);
            let coef = s.coefficients();
            assert_abs_diff_eq!(coef[0], 2.0, epsilon = 0.25);
            assert!(s.weight > 0.0 && s.weight.is_finite());
        }
        // Window {4, 3, 5}: mean 4, so the centroid part of the feature is 4.
        assert_abs_diff_eq!(summaries[4].centroid()[0], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn precision_inverts_covariance() {
        let (samples, targets) = wiggly_line(6);
        let summaries = NeighborhoodSummarizer::new(3).summarize(&samples, &targets).unwrap();

        for s in &summaries {
            let product = &s.covariance * &s.precision;
            let identity = DMatrix::<f64>::identity(3, 3);
            for (a, b) in product.iter().zip(identity.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
            }
            // Coefficient block and scatter block do not mix.
            assert_eq!(s.covariance[(0, 2)], 0.0);
            assert_eq!(s.covariance[(2, 1)], 0.0);
        }
    }

    #[test]
    fn exact_fit_has_singular_covariance() {
        let samples: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..5).map(|i| 3.0 * i as f64 - 1.0).collect();
        let err = NeighborhoodSummarizer::new(3)
            .summarize(&samples, &targets)
            .unwrap_err();
        assert!(matches!(err, Error::SingularMatrix { .. }));
    }

    #[test]
    fn duplicated_sample_in_window_is_singular() {
        // Whole-number states where one sample repeats; the four distinct points
        // are coplanar, so neither the design nor the scatter has full rank.
        let samples = vec![
            vec![280.0, 62.0, 91.0],
            vec![282.0, 60.0, 94.0],
            vec![282.0, 60.0, 94.0],
            vec![281.0, 56.0, 91.0],
            vec![283.0, 64.0, 97.0],
        ];
        let targets = Target::Moisture.rates(&samples);
        let err = NeighborhoodSummarizer::new(5)
            .summarize(&samples, &targets)
            .unwrap_err();
        assert!(matches!(err, Error::SingularMatrix { .. }), "{err}");
    }

    #[test]
    fn whole_number_samples_never_yield_an_indefinite_metric() {
        let bounds = SampleBounds::default();
        for seed in [0, 292] {
            let samples = bounds.sample(40, &mut StdRng::seed_from_u64(seed));
            let targets = Target::Enzyme.rates(&samples);
            match NeighborhoodSummarizer::new(5).summarize(&samples, &targets) {
                Ok(summaries) => {
                    for (i, s) in summaries.iter().enumerate() {
                        assert!(s.precision.clone().cholesky().is_some(), "sample {i}");
                        assert!(s.weight > 0.0 && s.weight.is_finite(), "sample {i}");
                    }
                }
                Err(err) => assert!(matches!(err, Error::SingularMatrix { .. }), "{err}"),
            }
        }
    }

    #[test]
    fn window_must_leave_residual_degrees_of_freedom() {
        let (samples, targets) = wiggly_line(6);
        assert!(matches!(
            NeighborhoodSummarizer::new(2).summarize(&samples, &targets),
            Err(Error::InvalidParameter { name: "window", .. })
        ));
        assert!(matches!(
            NeighborhoodSummarizer::new(7).summarize(&samples, &targets),
            Err(Error::InvalidParameter { name: "window", .. })
        ));
        assert!(matches!(
            NeighborhoodSummarizer::new(3).summarize(&samples, &targets[..4]),
            Err(Error::InvalidParameter { name: "targets", .. })
        ));
    }
}
