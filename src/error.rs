//! Error types for truncated GMM fitting.

use thiserror::Error;

/// Errors that can occur while configuring or fitting a truncated GMM.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GmmError {
    /// Configuration rejected before any iteration ran.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// Algorithm name did not match any known variant.
    #[error("unknown algorithm '{0}': expected var-GMM-X, var-GMM-S, full-neighbor or responsibility-neighbor (optionally with '+1')")]
    UnknownAlgorithm(String),

    /// Not enough rows to seed the requested number of components.
    #[error("insufficient data: required {required}, actual {actual}")]
    InsufficientData {
        /// Minimum number of rows needed.
        required: usize,
        /// Number of rows provided.
        actual: usize,
    },

    /// Feature dimensionality does not match the model.
    #[error("dimension mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Dimensionality provided.
        actual: usize,
    },

    /// Workers contributed incompatible shapes to a collective call.
    ///
    /// Partial results are never trusted; every worker observes this error.
    #[error("collective '{op}' shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Name of the collective operation.
        op: &'static str,
        /// Shape the operation expected.
        expected: usize,
        /// Shape that was contributed.
        actual: usize,
    },

    /// Every active-set log-joint of a point was -inf, so its posterior is undefined.
    ///
    /// This means the neighbor graph lost the point's best component.
    #[error("point {row} has no finite log-joint in its active set (iteration {iteration})")]
    NonFiniteRow {
        /// Global row index of the point.
        row: usize,
        /// Iteration in which the row degenerated (0 during warm-up).
        iteration: usize,
    },

    /// A worker thread panicked and the group cannot make progress.
    #[error("worker {rank} panicked")]
    WorkerPanicked {
        /// Rank of the failed worker.
        rank: usize,
    },

    /// Communication layer failure other than a shape mismatch.
    #[error("communication failed: {0}")]
    Comm(String),
}

impl GmmError {
    /// Create an InvalidConfig error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create a ShapeMismatch error for the named collective.
    pub fn shape_mismatch(op: &'static str, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            op,
            expected,
            actual,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GmmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let errors = [
            GmmError::invalid_config("Cprime (5) must not exceed C (4)"),
            GmmError::UnknownAlgorithm("var-GMM-Z".into()),
            GmmError::dimension_mismatch(2, 3),
            GmmError::shape_mismatch("all_reduce_sum_f64", 8, 6),
            GmmError::NonFiniteRow {
                row: 17,
                iteration: 3,
            },
            GmmError::WorkerPanicked { rank: 2 },
        ];
        let expected = [
            "Cprime (5)",
            "var-GMM-Z",
            "expected 2",
            "all_reduce_sum_f64",
            "point 17",
            "worker 2",
        ];

        for (err, want) in errors.iter().zip(expected.iter()) {
            let shown = err.to_string();
            assert!(
                shown.contains(want),
                "display for {:?} should contain '{}', got: {}",
                err,
                want,
                shown
            );
        }
    }
}
