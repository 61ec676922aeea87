//! Error taxonomy shared by every stage of the inversion pipeline.

use thiserror::Error;

/// Errors produced while loading data, configuring a model, or sampling.
#[derive(Error, Debug)]
pub enum SipError {
    /// The input rows could not be turned into a measurement record.
    #[error("malformed SIP data: {0}")]
    DataFormat(String),

    /// A vector or array had the wrong length for the operation.
    #[error("shape mismatch for `{name}`: expected {expected}, got {actual}")]
    Shape {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An argument was rejected before any state was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The sampler could not start or finish a run.
    #[error("sampling failed: {0}")]
    Sampling(String),

    /// Statistics were requested before a successful `fit()`.
    #[error("no fit results available; call fit() first")]
    NotFitted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SipError>;
