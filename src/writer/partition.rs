//! Memory-bounded partitioning of the time axis.
//!
//! One chunk of a field holds `chunk_len × channels × max_sample_length`
//! 8-byte floats. The chunk length is the largest that keeps one chunk under
//! the memory budget, and the time axis is then split into chunks whose
//! sizes differ by at most one, larger chunks first.

use std::ops::Range;

use super::WriterError;

/// Size of one stored sample in bytes
const ELEMENT_BYTES: usize = 8;

/// Bytes per megabyte as used by the memory budget
const BYTES_PER_MB: usize = 1_000_000;

/// Largest number of time steps per chunk that fits `budget_mb`
///
/// Never less than 1, even when a single time step exceeds the budget.
pub fn chunk_len(
    channel_count: usize,
    max_sample_length: usize,
    budget_mb: usize,
) -> Result<usize, WriterError> {
    if channel_count == 0 {
        return Err(WriterError::DegenerateInput(
            "cannot size chunks for zero channels".to_string(),
        ));
    }
    if max_sample_length == 0 {
        return Err(WriterError::DegenerateInput(
            "cannot size chunks for zero-length samples".to_string(),
        ));
    }
    let element_bytes = max_sample_length * ELEMENT_BYTES;
    let elements_per_budget = budget_mb.saturating_mul(BYTES_PER_MB) / element_bytes;
    Ok((elements_per_budget / channel_count).max(1))
}

/// Contiguous time ranges covering the whole axis exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunk_len: usize,
    chunks: Vec<Range<usize>>,
}

impl ChunkPlan {
    /// Split `total_time_steps` into balanced chunks of at most `chunk_len`
    pub fn new(total_time_steps: usize, chunk_len: usize) -> Result<Self, WriterError> {
        if total_time_steps == 0 {
            return Err(WriterError::DegenerateInput(
                "cannot partition an empty time axis".to_string(),
            ));
        }
        if chunk_len == 0 {
            return Err(WriterError::DegenerateInput(
                "chunk length must be at least 1".to_string(),
            ));
        }

        let num_chunks = (total_time_steps + chunk_len - 1) / chunk_len;
        let full = (total_time_steps + num_chunks - 1) / num_chunks;
        let partial = full - 1;
        // chunks holding `full` steps come first, the rest hold `partial`
        let num_full = total_time_steps - partial * num_chunks;

        let mut chunks = Vec::with_capacity(num_chunks);
        let mut start = 0;
        for i in 0..num_chunks {
            let len = if i < num_full { full } else { partial };
            chunks.push(start..start + len);
            start += len;
        }

        Ok(Self { chunk_len, chunks })
    }

    /// Plan for a field of the given extents under `budget_mb`
    pub fn for_field(
        total_time_steps: usize,
        channel_count: usize,
        max_sample_length: usize,
        budget_mb: usize,
    ) -> Result<Self, WriterError> {
        let len = chunk_len(channel_count, max_sample_length, budget_mb)?;
        Self::new(total_time_steps, len)
    }

    /// The budget-derived chunk length the plan was built from
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// The time ranges, in order
    pub fn chunks(&self) -> &[Range<usize>] {
        &self.chunks
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if the plan has no chunks
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Length of the largest chunk, which is the declared chunk length of the array
    pub fn max_chunk_len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).max().unwrap_or(0)
    }
}
