use super::metadata::DataType;

/// Errors that can occur while reading or writing a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from the Arrow library while building or decoding chunk columns
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Error from the Parquet library while encoding or decoding a chunk
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// Error serializing/deserializing node metadata
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// A store, group, or array already exists at the target location
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The requested store, group, or array does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The on-disk layout or metadata is malformed
    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    /// The store has been finalized and can no longer be modified
    #[error("Store is finalized and read-only: {0}")]
    ReadOnly(String),

    /// An append disagrees with the array's established non-time extents
    #[error("Shape mismatch for array '{array}': expected trailing shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Array path inside the store
        array: String,
        /// Established extents of every axis after the time axis
        expected: Vec<u64>,
        /// Extents of the rejected block
        found: Vec<u64>,
    },

    /// Element count of a block does not match its declared shape
    #[error("Length mismatch for array '{array}': shape requires {expected} elements, got {found}")]
    LengthMismatch {
        /// Array path inside the store
        array: String,
        /// Element count implied by the shape
        expected: usize,
        /// Element count supplied
        found: usize,
    },

    /// Data of one element type was supplied to an array of another
    #[error("Data type mismatch for array '{array}': expected {expected}, found {found}")]
    DataTypeMismatch {
        /// Array path inside the store
        array: String,
        /// The array's element type
        expected: DataType,
        /// The supplied element type
        found: DataType,
    },

    /// The requested chunk shape cannot be represented by the store
    #[error("Unsupported chunk layout for array '{array}': {reason}")]
    UnsupportedChunking {
        /// Array path inside the store
        array: String,
        /// Why the layout was rejected
        reason: String,
    },
}
