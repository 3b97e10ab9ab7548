use std::path::PathBuf;

use crate::store::StoreError;

/// Errors that can occur while combining stores
#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    /// Error from a source or destination store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error while preparing the destination
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The destination already exists and overwriting is disabled
    #[error("Destination already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The destination cannot be derived from the given paths
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// A `sonar_model` value no combiner knows
    #[error("Unknown sonar model: {0}")]
    UnknownSonarModel(String),

    /// The combine succeeded but some sources could not be deleted
    #[error("Failed to delete {} source(s): {failed:?}", failed.len())]
    PartialDeletionFailure {
        /// Paths that are still present
        failed: Vec<PathBuf>,
    },
}
