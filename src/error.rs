use thiserror::Error;

/// Errors surfaced by the sampling engine.
///
/// Configuration problems are raised during initialization and terminate the
/// run. Writer failures are raised mid-run because streamed output cannot be
/// reconstructed afterwards. Rejected candidates (out of limits, zero prior,
/// invalid likelihood) are *not* errors; they count as rejected steps.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no target function specified (set a likelihood or a negative log-likelihood)")]
    MissingTarget,

    #[error("parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("proposal covariance is {found}x{found}, expected {expected}x{expected}")]
    CovarianceSize { found: usize, expected: usize },

    #[error("matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("writer is not initialized")]
    WriterNotInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
