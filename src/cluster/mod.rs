//! Clustering of observations that each carry their own metric.
//!
//! ## Why a metric per observation?
//!
//! In a piecewise-affine surrogate every observation summarizes a local regression:
//! a feature vector (coefficients plus the window centroid) and the uncertainty of
//! that fit. A precise local fit should pull hard on its cluster; a noisy one
//! should barely matter. Carrying the inverse covariance `M_i` with every
//! observation expresses exactly that.
//!
//! ## Algorithm
//!
//! ### Mahalanobis k-means
//!
//! k-means with three generalizations:
//!
//! - distances are `(x_i − c)ᵀ M_i (x_i − c)`, measured under the metric of the
//!   observation, not of the cluster
//! - k-means++ seeding samples proportionally to that distance
//! - centroids are precision-weighted means `(Σ M_i)⁻¹ Σ M_i x_i`
//!
//! **Objective**: minimize total distortion:
//!
//! ```text
//! J = Σ_k Σ_{i ∈ C_k} (x_i − μ_k)ᵀ M_i (x_i − μ_k)
//! ```
//!
//! With `M_i = I` for every observation this is ordinary k-means.
//!
//! ## Usage
//!
//! ```rust
//! use fmeans::cluster::{Clustering, MahalanobisKmeans};
//! use nalgebra::DMatrix;
//!
//! let data = vec![
//!     vec![0.0, 0.0],
//!     vec![0.1, 0.1],
//!     vec![10.0, 10.0],
//!     vec![10.1, 10.1],
//! ];
//! let metrics = vec![DMatrix::identity(2, 2); data.len()];
//!
//! let fit = MahalanobisKmeans::new(2).with_seed(42).fit(&data, &metrics).unwrap();
//! let labels = fit.labels();
//! assert_eq!(labels[0], labels[1]);  // First two together
//! assert_ne!(labels[0], labels[2]);  // Separate from last two
//!
//! // Out-of-sample points use plain Euclidean distance to the centroids.
//! let new_labels = fit.predict(&[vec![9.5, 9.8]]).unwrap();
//! assert_eq!(new_labels[0], labels[2]);
//!
//! // Or just the labels.
//! let labels = MahalanobisKmeans::new(2).fit_predict(&data, &metrics).unwrap();
//! assert_eq!(labels.len(), data.len());
//! ```

mod mahalanobis;
pub mod metric;
mod traits;
mod util;

pub use mahalanobis::{distortion, predict, MahalanobisKmeans, MahalanobisKmeansFit};
pub use metric::{mahalanobis_sq, validate_metric};
pub use traits::Clustering;
