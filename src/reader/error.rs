use crate::store::StoreError;

/// Errors that can occur during reading
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Error from the underlying store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The array or its coordinates are not laid out as a written field
    #[error("Invalid field layout: {0}")]
    InvalidLayout(String),

    /// The group has no array of that name
    #[error("Array not found: {0}")]
    ArrayNotFound(String),
}
