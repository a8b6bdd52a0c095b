use thiserror::Error;

/// Errors returned by the clustering core and the surrogate pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Input slice is empty.
    #[error("empty input")]
    EmptyInput,

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: &'static str,
    },

    /// Requested cluster count is incompatible with the dataset.
    #[error("invalid cluster count: requested {requested}, but dataset has {n_items} items")]
    InvalidClusterCount {
        /// Requested number of clusters.
        requested: usize,
        /// Number of items in the dataset.
        n_items: usize,
    },

    /// Points (or metric matrices) have inconsistent dimensionality.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Found dimensionality.
        found: usize,
    },

    /// A per-observation metric failed validation.
    #[error("metric {index} is invalid: {reason}")]
    InvalidMetric {
        /// Observation index owning the metric.
        index: usize,
        /// What the check found.
        reason: &'static str,
    },

    /// A matrix that must be inverted is singular.
    #[error("singular matrix: {context}")]
    SingularMatrix {
        /// Which matrix failed, e.g. "precision sum of cluster 2".
        context: String,
    },

    /// A cluster lost all of its members.
    #[error("cluster {cluster} is empty at iteration {iteration}")]
    DegenerateCluster {
        /// Cluster index.
        cluster: usize,
        /// Iteration at which the cluster was found empty (0 = initial assignment).
        iteration: usize,
    },
}

impl Error {
    /// True for malformed call arguments, which are rejected before any computation.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::EmptyInput
                | Error::InvalidParameter { .. }
                | Error::InvalidClusterCount { .. }
                | Error::DimensionMismatch { .. }
                | Error::InvalidMetric { .. }
        )
    }
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
