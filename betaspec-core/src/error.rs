//! Error types for betaspec-core.

use thiserror::Error;

/// Result type alias for betaspec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for betaspec operations.
///
/// Everything here is a configuration-level failure: it is reported before
/// any sampling or fitting starts and aborts the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Decay charge other than -1 (electron) or +1 (positron).
    #[error("invalid decay charge {0}: expected -1 or +1 (0 is not a beta decay)")]
    InvalidCharge(i32),

    /// Endpoint energy is zero, negative or not finite.
    #[error("endpoint energy Q must be positive and finite, got {0} eV")]
    NonPositiveQValue(f64),

    /// Energy interval with `lower >= upper`, a negative lower edge or NaN.
    #[error("invalid energy window [{lower}, {upper}]")]
    InvalidWindow { lower: f64, upper: f64 },

    /// Histogram with no bins.
    #[error("invalid bin count: {0}")]
    InvalidBinCount(usize),

    /// Two histograms with different binning were combined.
    #[error("histogram binning mismatch: {0}")]
    BinningMismatch(String),

    /// Histogram parts that violate the histogram invariants.
    #[error("invalid histogram: {0}")]
    InvalidHistogram(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Failures of the rejection sampling loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    /// The iteration cap was reached without a single acceptance.
    #[error(
        "sampling stalled after {attempts} attempts in [{lower}, {upper}] eV \
         (h = {envelope_scale}, envelope = {envelope:e}, max density seen = {max_density_seen:e})"
    )]
    Stall {
        attempts: u64,
        envelope_scale: f64,
        lower: f64,
        upper: f64,
        envelope: f64,
        max_density_seen: f64,
    },

    /// The run deadline passed before the requested number of events was reached.
    #[error("sampling deadline exceeded after {accepted} of {target} events")]
    DeadlineExceeded { accepted: u64, target: u64 },

    /// Sampler configuration error.
    #[error(transparent)]
    Config(#[from] Error),
}
