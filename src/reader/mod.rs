//! # Field Reader
//!
//! Reads a written field back into [`DatagramRecord`]s.
//!
//! Padding is removed on the way out: cells whose samples are all NaN are
//! dropped, and trailing NaNs are trimmed from the rest. Arrays are decoded
//! one chunk at a time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use echostore::reader::read_field;
//! use echostore::store::Store;
//!
//! let store = Store::open("file.zarr")?;
//! for record in read_field(&store, "Beam", "backscatter_r")? {
//!     println!("{} {}: {} samples", record.timestamp, record.channel, record.sample_len());
//! }
//! # Ok::<(), echostore::reader::ReaderError>(())
//! ```

mod error;


pub use error::ReaderError;

use crate::record::{DatagramRecord, CHANNEL_DIM, PING_TIME_DIM, RANGE_SAMPLE_DIM};
use crate::store::{ArrayData, ArrayHandle, Group, Store};

/// The `ping_time` and `channel` coordinates of a group
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    /// Ping times, nanoseconds since the Unix epoch
    pub ping_time: Vec<i64>,
    /// Channel identifiers
    pub channel: Vec<String>,
}

/// Read the coordinates of `group`
pub fn read_coordinates(store: &Store, group: &str) -> Result<Coordinates, ReaderError> {
    coordinates(&store.group(group)?)
}

fn coordinates(group: &Group) -> Result<Coordinates, ReaderError> {
    let ping_time = match require(group, PING_TIME_DIM)?.read()? {
        ArrayData::Int64(values) => values,
        other => {
            return Err(ReaderError::InvalidLayout(format!(
                "{}/{PING_TIME_DIM} has type {}, expected int64",
                group.path(),
                other.dtype()
            )))
        }
    };
    let channel = match require(group, CHANNEL_DIM)?.read()? {
        ArrayData::Utf8(values) => values,
        other => {
            return Err(ReaderError::InvalidLayout(format!(
                "{}/{CHANNEL_DIM} has type {}, expected utf8",
                group.path(),
                other.dtype()
            )))
        }
    };
    Ok(Coordinates { ping_time, channel })
}

fn require(group: &Group, name: &str) -> Result<ArrayHandle, ReaderError> {
    if !group.has_array(name) {
        return Err(ReaderError::ArrayNotFound(format!("{}/{name}", group.path())));
    }
    Ok(group.array(name)?)
}

/// Read the populated cells of a written field
///
/// A `(ping_time, channel, range_sample)` field yields records carrying
/// samples. A `(ping_time, channel)` auxiliary field yields records with no
/// samples and the value under the field's name in `aux`. Records come out
/// in (timestamp, channel) order.
///
/// The store keeps no per-cell length: a record ends at its last non-NaN
/// sample. Trailing NaN samples are therefore dropped on read, and a cell
/// that is all NaN (an empty or all-NaN record, or padding) yields no
/// record at all. The same holds for NaN auxiliary values.
pub fn read_field(store: &Store, group: &str, field: &str) -> Result<Vec<DatagramRecord>, ReaderError> {
    let group = store.group(group)?;
    let coords = coordinates(&group)?;
    let array = require(&group, field)?;

    let dims: Vec<&str> = array.dimensions().iter().map(String::as_str).collect();
    let scalar = match dims.as_slice() {
        [PING_TIME_DIM, CHANNEL_DIM, RANGE_SAMPLE_DIM] => false,
        [PING_TIME_DIM, CHANNEL_DIM] => true,
        _ => {
            return Err(ReaderError::InvalidLayout(format!(
                "{} has dimensions {:?}",
                array.path(),
                dims
            )))
        }
    };

    let shape = array.shape();
    if shape[0] as usize != coords.ping_time.len() || shape[1] as usize != coords.channel.len() {
        return Err(ReaderError::InvalidLayout(format!(
            "{} has shape {:?} but coordinates are {} x {}",
            array.path(),
            shape,
            coords.ping_time.len(),
            coords.channel.len()
        )));
    }

    let channels = coords.channel.len();
    let cell_len = if scalar { 1 } else { shape[2] as usize };
    if channels == 0 || cell_len == 0 {
        return Ok(Vec::new());
    }
    let chunk_rows = array.chunks()[0] as usize;
    let mut records = Vec::new();

    for index in 0..array.num_chunks() {
        let chunk = array.read_chunk(index)?;
        let values = chunk.as_f64().ok_or_else(|| {
            ReaderError::InvalidLayout(format!(
                "{} has type {}, expected float64",
                array.path(),
                chunk.dtype()
            ))
        })?;

        let first_row = index as usize * chunk_rows;
        for (row, cells) in values.chunks(channels * cell_len).enumerate() {
            let timestamp = coords.ping_time[first_row + row];
            for (c, cell) in cells.chunks(cell_len).enumerate() {
                let Some(end) = cell.iter().rposition(|v| !v.is_nan()) else {
                    continue;
                };
                let channel = coords.channel[c].clone();
                let record = if scalar {
                    DatagramRecord::empty(timestamp, channel).with_aux(field, cell[0])
                } else {
                    DatagramRecord::new(timestamp, channel, cell[..=end].to_vec())
                };
                records.push(record);
            }
        }
    }

    Ok(records)
}
