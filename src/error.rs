// this_file: src/error.rs
//! Error types for the mandelpan library

use crate::grid::OutOfBounds;
use thiserror::Error;

/// Main error type for mandelpan operations
#[derive(Debug, Error)]
pub enum Error {
    /// Backing storage could not be allocated
    #[error("Allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    /// Configuration value rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Event script rejected by validation
    #[error("Invalid event script: {reason}")]
    InvalidScript { reason: String },

    /// Requested plane rectangle does not fit the cached region
    #[error("Projection out of bounds: {0}")]
    OutOfBounds(OutOfBounds),

    /// The pipeline was shut down while the operation was pending
    #[error("Pipeline closed")]
    Closed,

    /// Worker thread could not be spawned or joined
    #[error("Worker thread error: {0}")]
    Thread(String),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl From<crate::queue::Closed> for Error {
    fn from(_: crate::queue::Closed) -> Self {
        Error::Closed
    }
}

/// Result type alias for mandelpan operations
pub type Result<T> = std::result::Result<T, Error>;
