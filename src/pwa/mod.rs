//! Piecewise-affine (PWA) surrogate models.
//!
//! The pipeline fits a handful of affine models to a nonlinear process:
//!
//! 1. [`NeighborhoodSummarizer`]: a local regression per sample, condensed into a
//!    feature vector and a precision matrix.
//! 2. [`MahalanobisKmeans`]: partition the feature vectors, each judged by its own
//!    precision matrix.
//! 3. [`ClusterRegressor`]: one weighted least-squares fit per region.
//!
//! ```rust
//! use fmeans::pwa::{process::SampleBounds, PwaParams, PwaSurrogate, Target};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let samples = SampleBounds::default().sample_continuous(60, &mut rng);
//! let targets = Target::Moisture.rates(&samples);
//!
//! let model = PwaSurrogate::new(PwaParams { n_regions: 2, ..Default::default() })
//!     .fit(&samples, &targets)
//!     .unwrap();
//! assert_eq!(model.local_models().len(), 2);
//! ```

pub mod neighborhood;
pub mod process;
pub mod regression;

pub use neighborhood::{LocalSummary, NeighborhoodSummarizer};
pub use process::Target;
pub use regression::{ClusterRegressor, LocalModel};

use crate::cluster::{MahalanobisKmeans, MahalanobisKmeansFit};
use crate::error::{Error, Result};
use log::{info, warn};
use nalgebra::DMatrix;

/// Pipeline parameters.
#[derive(Clone, Debug)]
pub struct PwaParams {
    /// Samples per local regression window.
    pub window: usize,
    /// Number of affine regions (clusters).
    pub n_regions: usize,
    /// Iteration cap for the clustering step.
    pub max_iter: usize,
    /// Seed for the clustering step.
    pub seed: u64,
    /// Ridge on each cluster's precision sum (0 = off).
    pub regularization: f64,
    /// Ridge on each window covariance before inversion (0 = off).
    pub covariance_ridge: f64,
    /// Extra clustering attempts, with seeds `seed + 1, seed + 2, ..`, when a cluster
    /// comes out empty.
    pub restarts: usize,
}

impl Default for PwaParams {
    fn default() -> Self {
        Self {
            window: 5,
            n_regions: 3,
            max_iter: 1000,
            seed: 0,
            regularization: 0.0,
            covariance_ridge: 0.0,
            restarts: 10,
        }
    }
}

/// Fits a [`PwaModel`].
#[derive(Clone, Debug)]
pub struct PwaSurrogate {
    params: PwaParams,
}

impl PwaSurrogate {
    /// Create a pipeline (parameters only).
    pub fn new(params: PwaParams) -> Self {
        Self { params }
    }

    /// Access the parameters.
    pub fn params(&self) -> &PwaParams {
        &self.params
    }

    /// Fit a surrogate of `targets` over `samples` (one row of predictors per sample).
    pub fn fit(&self, samples: &[Vec<f64>], targets: &[f64]) -> Result<PwaModel> {
        let p = &self.params;
        let summaries = NeighborhoodSummarizer::new(p.window)
            .with_ridge(p.covariance_ridge)
            .summarize(samples, targets)?;

        let features: Vec<Vec<f64>> = summaries.iter().map(|s| s.feature.clone()).collect();
        let metrics: Vec<DMatrix<f64>> = summaries.iter().map(|s| s.precision.clone()).collect();

        let clustering = self.cluster(&features, &metrics)?;
        let local_models = ClusterRegressor::new().fit(
            samples,
            targets,
            &summaries,
            clustering.labels(),
            clustering.n_clusters(),
        )?;

        info!(
            "fitted {} regions over {} samples (sizes {:?})",
            local_models.len(),
            samples.len(),
            clustering.cluster_sizes()
        );
        Ok(PwaModel {
            summaries,
            clustering,
            local_models,
        })
    }

    fn cluster(&self, features: &[Vec<f64>], metrics: &[DMatrix<f64>]) -> Result<MahalanobisKmeansFit> {
        let p = &self.params;
        let mut attempt = 0;
        loop {
            let seed = p.seed.wrapping_add(attempt as u64);
            let result = MahalanobisKmeans::new(p.n_regions)
                .with_max_iter(p.max_iter)
                .with_seed(seed)
                .with_regularization(p.regularization)
                .fit(features, metrics);

            match result {
                Err(Error::DegenerateCluster { cluster, iteration }) if attempt < p.restarts => {
                    warn!(
                        "seed {}: cluster {} emptied at iteration {}, retrying",
                        seed, cluster, iteration
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// A fitted piecewise-affine surrogate.
#[derive(Clone, Debug)]
pub struct PwaModel {
    summaries: Vec<LocalSummary>,
    clustering: MahalanobisKmeansFit,
    local_models: Vec<LocalModel>,
}

impl PwaModel {
    /// Region of every sample.
    pub fn labels(&self) -> &[usize] {
        self.clustering.labels()
    }

    /// The regression window summary of every sample.
    pub fn summaries(&self) -> &[LocalSummary] {
        &self.summaries
    }

    /// The clustering result over the window features.
    pub fn clustering(&self) -> &MahalanobisKmeansFit {
        &self.clustering
    }

    /// One affine model per region.
    pub fn local_models(&self) -> &[LocalModel] {
        &self.local_models
    }

    /// Value of region `region`'s model at `x`, or `None` for an unknown region.
    pub fn evaluate(&self, region: usize, x: &[f64]) -> Option<f64> {
        self.local_models.get(region).map(|m| m.evaluate(x))
    }
}
