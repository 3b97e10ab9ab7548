use crate::store::StoreError;

/// Errors that can occur while writing a field
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// The field is indexed by something other than `{timestamp, channel}`
    #[error("Field '{field}' has unsupported index dimensions {dims:?}; expected [timestamp, channel]")]
    UnsupportedDimensions {
        /// Field name
        field: String,
        /// Dimensions declared for the field
        dims: Vec<String>,
    },

    /// Nothing to write, or nothing to size a chunk from
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// Two records share the same (timestamp, channel) key
    #[error("Field '{field}' has more than one record at timestamp {timestamp} on channel '{channel}'")]
    DuplicateRecord {
        /// Field name
        field: String,
        /// Colliding timestamp
        timestamp: i64,
        /// Colliding channel
        channel: String,
    },

    /// A record carries more samples than the field's reference length
    #[error("Field '{field}' has a record with {length} samples, exceeding the reference length {reference_length}")]
    SampleLengthExceeded {
        /// Field name
        field: String,
        /// Length of the offending sample array
        length: usize,
        /// Reference (padded) length of the field
        reference_length: usize,
    },

    /// The group's existing coordinates differ from the index of this batch
    #[error("Coordinates of group '{group}' do not match the records being written")]
    CoordinateMismatch {
        /// Group name
        group: String,
    },

    /// An auxiliary scalar is named like a coordinate, a field, or an
    /// array the group already holds
    #[error("Auxiliary field '{name}' of '{field}' collides with an existing coordinate or field")]
    ReservedName {
        /// Field carrying the auxiliary scalar
        field: String,
        /// Colliding name
        name: String,
    },

    /// Error from the underlying store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WriterError {
    /// Returns true if the error only invalidates the field being written
    ///
    /// Store errors (including shape mismatches on append) are fatal to the
    /// file's conversion.
    pub fn is_field_local(&self) -> bool {
        !matches!(self, WriterError::Store(_))
    }
}
