//! Mahalanobis k-means++ for piecewise-affine surrogate models.
//!
//! `fmeans` partitions observations that each carry their own precision matrix.
//!
//! The public API is split in two:
//! - [`cluster`]: the clustering core (metric-aware k-means++ seeding, Lloyd
//!   iterations with precision-weighted centroids, prediction)
//! - [`pwa`]: the surrogate pipeline around it (local regression windows, per-cluster
//!   weighted least squares, and the degradation process the pipeline was built for)

#![forbid(unsafe_code)]

pub mod cluster;
pub mod error;
pub mod pwa;

pub use cluster::{
    distortion, mahalanobis_sq, predict, Clustering, MahalanobisKmeans, MahalanobisKmeansFit,
};
pub use error::{Error, Result};
pub use pwa::{
    ClusterRegressor, LocalModel, LocalSummary, NeighborhoodSummarizer, PwaModel, PwaParams,
    PwaSurrogate, Target,
};
