//! # Datagram Records
//!
//! The records handed to this crate by an external datagram parser.
//!
//! A [`DatagramRecord`] is one decoded ping (or sensor reading) for one
//! channel at one instant. Its `samples` array is ragged: pings on the same
//! channel may carry a different number of samples, and a record may carry
//! none at all. Records are grouped into a [`FieldBatch`], which tags them
//! with the store group and array name they are written to.

use std::collections::BTreeMap;

/// Index dimension name for the record timestamp
pub const TIMESTAMP_DIM: &str = "timestamp";

/// Index dimension name for the record channel
pub const CHANNEL_DIM: &str = "channel";

/// Stored dimension name for the time axis of written arrays
pub const PING_TIME_DIM: &str = "ping_time";

/// Stored dimension name for the trailing sample axis of ragged arrays
pub const RANGE_SAMPLE_DIM: &str = "range_sample";

/// One decoded ping or sensor reading
#[derive(Debug, Clone, PartialEq)]
pub struct DatagramRecord {
    /// Acquisition time in nanoseconds since the Unix epoch
    pub timestamp: i64,

    /// Channel (transducer/sensor stream) identifier
    pub channel: String,

    /// Variable-length sample array, absent when the ping carried no data
    pub samples: Option<Vec<f64>>,

    /// Auxiliary scalar fields decoded alongside the samples
    pub aux: BTreeMap<String, f64>,
}

impl DatagramRecord {
    /// Create a record carrying a sample array
    pub fn new(timestamp: i64, channel: impl Into<String>, samples: Vec<f64>) -> Self {
        Self {
            timestamp,
            channel: channel.into(),
            samples: Some(samples),
            aux: BTreeMap::new(),
        }
    }

    /// Create a record with no sample data
    pub fn empty(timestamp: i64, channel: impl Into<String>) -> Self {
        Self {
            timestamp,
            channel: channel.into(),
            samples: None,
            aux: BTreeMap::new(),
        }
    }

    /// Attach an auxiliary scalar field
    pub fn with_aux(mut self, name: impl Into<String>, value: f64) -> Self {
        self.aux.insert(name.into(), value);
        self
    }

    /// Number of samples carried by this record (0 when absent)
    pub fn sample_len(&self) -> usize {
        self.samples.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// A run of records for one array field, tagged with where it is written
#[derive(Debug, Clone)]
pub struct FieldBatch {
    /// Store group the field belongs to (e.g. `Beam`)
    pub group: String,

    /// Array name inside the group (e.g. `backscatter_r`)
    pub field: String,

    /// Index dimensions of the records; only `[timestamp, channel]` is supported
    pub dims: Vec<String>,

    /// The records, in arrival order
    pub records: Vec<DatagramRecord>,
}

impl FieldBatch {
    /// Create a batch indexed by the default `(timestamp, channel)` dimensions
    pub fn new(
        group: impl Into<String>,
        field: impl Into<String>,
        records: Vec<DatagramRecord>,
    ) -> Self {
        Self {
            group: group.into(),
            field: field.into(),
            dims: default_dims(),
            records,
        }
    }

    /// Override the index dimensions declared for this batch
    pub fn with_dims<S: AsRef<str>>(mut self, dims: &[S]) -> Self {
        self.dims = dims.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    /// Names of all auxiliary scalar fields carried by any record, sorted
    pub fn aux_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .iter()
            .flat_map(|r| r.aux.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// The `[timestamp, channel]` index dimensions
pub fn default_dims() -> Vec<String> {
    vec![TIMESTAMP_DIM.to_string(), CHANNEL_DIM.to_string()]
}
