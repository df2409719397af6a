//! Error taxonomy for the inverse-solution pipeline.
//!
//! Every failure names the violated invariant with the offending
//! counts/names so that mis-paired forward/covariance/data triples can be
//! diagnosed from the message alone. Errors are surfaced immediately; no
//! operation retries or returns partial results.
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MinvError>;

/// All errors produced by this crate.
#[derive(Debug, Error)]
pub enum MinvError {
    /// Sensor/vertex/channel count or ordering disagreement between
    /// cooperating objects (forward vs. covariance, operator vs. data, …).
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Out-of-domain scalar parameter (λ² ≤ 0, loose outside (0, 1],
    /// invalid depth exponent, …).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Decomposition failure or a covariance that is not positive
    /// definite after regularization and eigenvalue clipping.
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// Out-of-bounds sample window on a raw segment.
    #[error("sample range out of bounds: {0}")]
    Range(String),

    /// Arithmetic between source estimates with differing vertex sets or
    /// time bases.
    #[error("incompatible source estimates: {0}")]
    IncompatibleEstimate(String),

    /// Malformed or missing input data (absent channel type, empty label
    /// intersection, truncated file, …).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
