/// Default memory budget for one in-flight chunk, in megabytes
pub const DEFAULT_BUDGET_MB: usize = 5;

/// Default chunk length of coordinate arrays
pub const DEFAULT_COORDINATE_CHUNK_LEN: usize = 65_536;

/// Configuration for writing fields into a store
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Memory budget for one chunk of one field, in megabytes
    pub budget_mb: usize,

    /// Largest chunk length used for `ping_time` and `channel` coordinates
    pub coordinate_chunk_len: usize,

    /// Write the fields of one group concurrently
    pub parallel_fields: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            budget_mb: DEFAULT_BUDGET_MB,
            coordinate_chunk_len: DEFAULT_COORDINATE_CHUNK_LEN,
            parallel_fields: true,
        }
    }
}

impl WriterConfig {
    /// Configuration with a custom memory budget
    pub fn with_budget_mb(budget_mb: usize) -> Self {
        Self {
            budget_mb,
            ..Self::default()
        }
    }

    /// Configuration that writes one field at a time
    pub fn sequential() -> Self {
        Self {
            parallel_fields: false,
            ..Self::default()
        }
    }
}
