//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON container could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// No histogram with this name in the container.
    #[error("histogram '{name}' not found in {}", path.display())]
    MissingHistogram { name: String, path: PathBuf },

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Extension or format not handled by this build.
    #[error("unsupported container format: {0}")]
    UnsupportedFormat(String),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] betaspec_core::Error),
}
