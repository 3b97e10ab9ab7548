use std::path::PathBuf;

use crate::combine::CombineError;
use crate::store::StoreError;
use crate::writer::WriterError;

/// Boxed error returned by a [`super::DatagramParser`]
pub type ParseError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during conversion
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The parser could not read a source file
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// Source file
        path: PathBuf,
        /// Parser error
        #[source]
        source: ParseError,
    },

    /// No source files were given
    #[error("No source files to convert")]
    NoSources,

    /// The save path cannot hold the outputs
    #[error("Invalid save path: {0}")]
    InvalidSavePath(String),

    /// An output store exists but was never finalized
    #[error("{} is a partial store from an interrupted conversion; convert with overwrite to replace it", .0.display())]
    PartialStore(PathBuf),

    /// Error writing a field
    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    /// Error from the output store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error combining the outputs
    #[error("Combine error: {0}")]
    Combine(#[from] CombineError),

    /// The worker pool could not be started
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
