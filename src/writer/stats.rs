use std::fmt;

/// Statistics from one written field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStats {
    /// Store group of the field
    pub group: String,
    /// Array name of the field
    pub field: String,
    /// Length of the padded time axis
    pub time_steps: usize,
    /// Number of channels
    pub channels: usize,
    /// Padded sample length (0 when only auxiliary scalars were written)
    pub reference_length: usize,
    /// Number of chunks appended
    pub chunks_written: usize,
    /// Declared chunk length along time
    pub chunk_len: usize,
    /// Number of (timestamp, channel) cells with no record
    pub padded_cells: usize,
    /// Auxiliary scalar arrays written alongside the field
    pub aux_fields: Vec<String>,
}

impl fmt::Display for FieldStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} x {} x {} in {} chunks of {} ({} padded cells)",
            self.group,
            self.field,
            self.time_steps,
            self.channels,
            self.reference_length,
            self.chunks_written,
            self.chunk_len,
            self.padded_cells
        )
    }
}

/// Fields that failed to write because of one error
///
/// A failure while preparing a group (creating it or writing its
/// coordinates) covers every field of that group.
#[derive(Debug)]
pub struct FieldFailure {
    /// Store group of the fields
    pub group: String,
    /// Array names of the fields
    pub fields: Vec<String>,
    /// Why the write failed
    pub error: super::WriterError,
}

/// Outcome of writing a set of field batches into one store
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Fields written successfully
    pub written: Vec<FieldStats>,
    /// Fields that failed
    pub failed: Vec<FieldFailure>,
}

impl BatchReport {
    /// Returns true if every field was written
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns true if any failure is fatal to the whole file
    pub fn has_fatal_error(&self) -> bool {
        self.failed.iter().any(|f| !f.error.is_field_local())
    }

    /// Take the first failure that is fatal to the whole file
    pub fn take_fatal_error(&mut self) -> Option<FieldFailure> {
        let index = self.failed.iter().position(|f| !f.error.is_field_local())?;
        Some(self.failed.remove(index))
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wrote {} fields ({} failed)",
            self.written.len(),
            self.failed.len()
        )
    }
}
