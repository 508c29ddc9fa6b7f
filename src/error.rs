//! Error types shared by every layer of the crate.

use thiserror::Error;

use crate::roots::BrentError;

/// Errors surfaced by integration, model construction and model evaluation.
///
/// A missed tolerance is not an error: it is reported through
/// [`IntegrationStatus::ToleranceNotMet`](crate::IntegrationStatus) on an
/// otherwise successful result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalaxyError {
    /// A point, velocity or action lies outside the support of the model
    /// (for example an unbound point passed to `moments`).
    #[error("domain error: {0}")]
    Domain(String),

    /// Malformed construction options. Raised when the object is built,
    /// never on first use.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid arguments to an operation (shape mismatch, non-finite bounds).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Non-finite integrand values persisted after the maximum number of
    /// forced subdivisions, or after the evaluation budget ran out.
    #[error(
        "numerical failure: non-finite integrand values at subdivision depth {depth} \
         after {evaluations} evaluations"
    )]
    NumericalFailure {
        /// Subdivision depth of the offending region
        depth: u32,
        /// Integrand evaluations spent before giving up
        evaluations: u64,
    },

    /// A turning-point search failed inside an action computation.
    #[error("root finding failed: {0}")]
    RootFinding(#[from] BrentError),
}

/// Result alias used throughout the crate.
pub type GalaxyResult<T> = Result<T, GalaxyError>;
