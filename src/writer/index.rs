//! Padded (timestamp × channel) index over a field's records.
//!
//! Records arrive sparse: not every channel pings at every timestamp. The
//! index takes the unique timestamps (ascending) and unique channels
//! (lexicographic) observed in a batch and forms their full cartesian
//! product. Each cell maps to at most one record; cells with no record are
//! padding and are written as NaN.

use std::collections::BTreeSet;

use crate::record::{DatagramRecord, CHANNEL_DIM, TIMESTAMP_DIM};

use super::WriterError;

/// Ordered unique values of both index axes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaddedIndex {
    timestamps: Vec<i64>,
    channels: Vec<String>,
}

impl PaddedIndex {
    /// Build an index over arbitrary (timestamp, channel) keys
    pub fn from_keys<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = (i64, &'a str)>,
    {
        let mut timestamps = BTreeSet::new();
        let mut channels = BTreeSet::new();
        for (timestamp, channel) in keys {
            timestamps.insert(timestamp);
            channels.insert(channel);
        }
        Self {
            timestamps: timestamps.into_iter().collect(),
            channels: channels.into_iter().map(str::to_string).collect(),
        }
    }

    /// Build an index over the keys of `records`
    pub fn from_records(records: &[DatagramRecord]) -> Self {
        Self::from_keys(records.iter().map(|r| (r.timestamp, r.channel.as_str())))
    }

    /// Unique timestamps, ascending
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Unique channels, lexicographic
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Length of the time axis
    pub fn time_steps(&self) -> usize {
        self.timestamps.len()
    }

    /// Length of the channel axis
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of cells (time steps × channels)
    pub fn len(&self) -> usize {
        self.timestamps.len() * self.channels.len()
    }

    /// Returns true if either axis is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat cell position of a key, if both values are on the index
    pub fn position(&self, timestamp: i64, channel: &str) -> Option<usize> {
        let t = self.timestamps.binary_search(&timestamp).ok()?;
        let c = self
            .channels
            .binary_search_by(|probe| probe.as_str().cmp(channel))
            .ok()?;
        Some(t * self.channels.len() + c)
    }
}

/// A field's records laid out on a [`PaddedIndex`]
///
/// Cells are stored row-major: all channels of the first timestamp, then
/// all channels of the next, and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedView<'a> {
    field: String,
    dims: Vec<String>,
    index: PaddedIndex,
    cells: Vec<Option<&'a DatagramRecord>>,
}

impl<'a> PaddedView<'a> {
    /// Build the padded view of one field's records over their own keys
    pub fn build<S: AsRef<str>>(
        field: &str,
        records: &'a [DatagramRecord],
        dims: &[S],
    ) -> Result<Self, WriterError> {
        Self::with_index(field, records, dims, PaddedIndex::from_records(records))
    }

    /// Lay out one field's records on a shared index
    ///
    /// Every record key must be on the index.
    pub fn with_index<S: AsRef<str>>(
        field: &str,
        records: &'a [DatagramRecord],
        dims: &[S],
        index: PaddedIndex,
    ) -> Result<Self, WriterError> {
        check_dims(field, dims)?;
        let mut cells: Vec<Option<&'a DatagramRecord>> = vec![None; index.len()];
        for record in records {
            let position = index.position(record.timestamp, &record.channel).ok_or_else(|| {
                WriterError::DegenerateInput(format!(
                    "record at timestamp {} on channel '{}' of field '{}' is outside the index",
                    record.timestamp, record.channel, field
                ))
            })?;
            if cells[position].is_some() {
                return Err(WriterError::DuplicateRecord {
                    field: field.to_string(),
                    timestamp: record.timestamp,
                    channel: record.channel.clone(),
                });
            }
            cells[position] = Some(record);
        }
        Ok(Self {
            field: field.to_string(),
            dims: dims.iter().map(|d| d.as_ref().to_string()).collect(),
            index,
            cells,
        })
    }

    /// Rebuild the view from its own populated cells
    ///
    /// The result equals `self` whenever `self` was built from its own keys.
    pub fn rebuild(&self) -> PaddedView<'a> {
        let records: Vec<&'a DatagramRecord> = self.cells.iter().flatten().copied().collect();
        let index = PaddedIndex::from_keys(records.iter().map(|r| (r.timestamp, r.channel.as_str())));
        let mut cells = vec![None; index.len()];
        for record in records {
            if let Some(position) = index.position(record.timestamp, &record.channel) {
                cells[position] = Some(record);
            }
        }
        Self {
            field: self.field.clone(),
            dims: self.dims.clone(),
            index,
            cells,
        }
    }

    /// Field name
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The index the view is laid out on
    pub fn index(&self) -> &PaddedIndex {
        &self.index
    }

    /// Length of the time axis
    pub fn time_steps(&self) -> usize {
        self.index.time_steps()
    }

    /// Length of the channel axis
    pub fn channel_count(&self) -> usize {
        self.index.channel_count()
    }

    /// Record at (time index, channel index), `None` for padding
    pub fn cell(&self, t: usize, c: usize) -> Option<&'a DatagramRecord> {
        self.cells
            .get(t * self.index.channel_count() + c)
            .copied()
            .flatten()
    }

    /// Sample array at (time index, channel index), `None` for padding or absent samples
    pub fn samples(&self, t: usize, c: usize) -> Option<&'a [f64]> {
        self.cell(t, c).and_then(|r| r.samples.as_deref())
    }

    /// Longest sample array over all populated cells
    pub fn max_sample_length(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .map(|r| r.sample_len())
            .max()
            .unwrap_or(0)
    }

    /// Number of cells with no record
    pub fn padded_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Populated records in canonical (timestamp, channel) order
    pub fn records(&self) -> impl Iterator<Item = &'a DatagramRecord> + '_ {
        self.cells.iter().flatten().copied()
    }
}

/// Check that `dims` is exactly the set `{timestamp, channel}`
pub(crate) fn check_dims<S: AsRef<str>>(field: &str, dims: &[S]) -> Result<(), WriterError> {
    let names: BTreeSet<&str> = dims.iter().map(|d| d.as_ref()).collect();
    let expected: BTreeSet<&str> = [TIMESTAMP_DIM, CHANNEL_DIM].into_iter().collect();
    if dims.len() != 2 || names != expected {
        return Err(WriterError::UnsupportedDimensions {
            field: field.to_string(),
            dims: dims.iter().map(|d| d.as_ref().to_string()).collect(),
        });
    }
    Ok(())
}
