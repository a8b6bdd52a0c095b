use crate::error::Result;
use nalgebra::DMatrix;

/// Common interface for hard clustering over observations that carry their own metric.
pub trait Clustering {
    /// Fit the model and return one cluster label per observation.
    ///
    /// `metrics[i]` is the precision matrix of `data[i]`.
    fn fit_predict(&self, data: &[Vec<f64>], metrics: &[DMatrix<f64>]) -> Result<Vec<usize>>;

    /// The configured number of clusters.
    fn n_clusters(&self) -> usize;
}
