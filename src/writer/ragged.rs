//! Chunked writing of padded views into store arrays.
//!
//! A chunk is assembled as a dense `(chunk_len, channels, reference_length)`
//! block, appended, and persisted before the next chunk is assembled, so at
//! most one chunk of one field is in memory at a time.

use std::ops::Range;

use log::debug;
use serde_json::json;

use crate::record::{CHANNEL_DIM, PING_TIME_DIM, RANGE_SAMPLE_DIM};
use crate::store::{ArrayData, ArrayHandle, ArraySpec, Attributes, DataType, FillValue, Group};

use super::index::{PaddedIndex, PaddedView};
use super::partition::ChunkPlan;
use super::{WriterConfig, WriterError};

/// Outcome of writing one array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrayWrite {
    pub chunks_written: usize,
    pub chunk_len: usize,
}

/// Write the ragged sample arrays of a view as `(ping_time, channel, range_sample)`
pub(crate) fn write_samples(
    group: &Group,
    view: &PaddedView<'_>,
    reference_length: usize,
    config: &WriterConfig,
) -> Result<ArrayWrite, WriterError> {
    let channels = view.channel_count();
    let plan = ChunkPlan::for_field(view.time_steps(), channels, reference_length, config.budget_mb)?;

    write_planned(
        group,
        view.field(),
        &plan,
        &[PING_TIME_DIM, CHANNEL_DIM, RANGE_SAMPLE_DIM],
        &[channels as u64, reference_length as u64],
        |steps| {
            let mut block = Vec::with_capacity(steps.len() * channels * reference_length);
            for t in steps {
                for c in 0..channels {
                    let samples = view.samples(t, c).unwrap_or(&[]);
                    if samples.len() > reference_length {
                        return Err(WriterError::SampleLengthExceeded {
                            field: view.field().to_string(),
                            length: samples.len(),
                            reference_length,
                        });
                    }
                    block.extend_from_slice(samples);
                    block.resize(block.len() + reference_length - samples.len(), f64::NAN);
                }
            }
            Ok(block)
        },
    )
}

/// Write one auxiliary scalar of a view as `(ping_time, channel)`
pub(crate) fn write_aux(
    group: &Group,
    view: &PaddedView<'_>,
    aux_name: &str,
    config: &WriterConfig,
) -> Result<ArrayWrite, WriterError> {
    let channels = view.channel_count();
    let plan = ChunkPlan::for_field(view.time_steps(), channels, 1, config.budget_mb)?;

    write_planned(
        group,
        aux_name,
        &plan,
        &[PING_TIME_DIM, CHANNEL_DIM],
        &[channels as u64],
        |steps| {
            let mut block = Vec::with_capacity(steps.len() * channels);
            for t in steps {
                for c in 0..channels {
                    let value = view
                        .cell(t, c)
                        .and_then(|r| r.aux.get(aux_name).copied())
                        .unwrap_or(f64::NAN);
                    block.push(value);
                }
            }
            Ok(block)
        },
    )
}

fn write_planned<F>(
    group: &Group,
    name: &str,
    plan: &ChunkPlan,
    dims: &[&str],
    trailing: &[u64],
    mut assemble: F,
) -> Result<ArrayWrite, WriterError>
where
    F: FnMut(Range<usize>) -> Result<Vec<f64>, WriterError>,
{
    let mut array: Option<ArrayHandle> = None;

    for (k, steps) in plan.chunks().iter().enumerate() {
        let mut shape = Vec::with_capacity(trailing.len() + 1);
        shape.push(steps.len() as u64);
        shape.extend_from_slice(trailing);

        let block = ArrayData::Float64(assemble(steps.clone())?);
        match array.as_mut() {
            None => {
                let spec = ArraySpec::new(DataType::Float64, dims, plan.max_chunk_len() as u64)
                    .with_fill_value(FillValue::Nan);
                array = Some(group.create_array(name, spec, &block, &shape)?);
            }
            Some(handle) => handle.append(&block, &shape)?,
        }
        debug!(
            "{}/{}: chunk {} of {} ({} steps)",
            group.path(),
            name,
            k + 1,
            plan.len(),
            steps.len()
        );
    }

    Ok(ArrayWrite {
        chunks_written: plan.len(),
        chunk_len: plan.max_chunk_len(),
    })
}

/// Write the group's `ping_time` and `channel` coordinates, or check existing ones
pub(crate) fn write_coordinates(
    group: &Group,
    index: &PaddedIndex,
    config: &WriterConfig,
) -> Result<(), WriterError> {
    if index.is_empty() {
        return Err(WriterError::DegenerateInput(format!(
            "no records to index in group '{}'",
            group.path()
        )));
    }

    let timestamps = ArrayData::Int64(index.timestamps().to_vec());
    let channels = ArrayData::Utf8(index.channels().to_vec());

    if group.has_array(PING_TIME_DIM) || group.has_array(CHANNEL_DIM) {
        let matches = group.has_array(PING_TIME_DIM)
            && group.has_array(CHANNEL_DIM)
            && group.array(PING_TIME_DIM)?.read()? == timestamps
            && group.array(CHANNEL_DIM)?.read()? == channels;
        if !matches {
            return Err(WriterError::CoordinateMismatch {
                group: group.path().to_string(),
            });
        }
        return Ok(());
    }

    let time_steps = index.time_steps();
    let mut time_attrs = Attributes::new();
    time_attrs.insert("axis".to_string(), json!("T"));
    time_attrs.insert(
        "units".to_string(),
        json!("nanoseconds since 1970-01-01T00:00:00Z"),
    );
    let time_spec = ArraySpec::new(
        DataType::Int64,
        &[PING_TIME_DIM],
        time_steps.min(config.coordinate_chunk_len).max(1) as u64,
    )
    .with_attributes(time_attrs);
    group.create_array(PING_TIME_DIM, time_spec, &timestamps, &[time_steps as u64])?;

    let channel_count = index.channel_count();
    let channel_spec = ArraySpec::new(DataType::Utf8, &[CHANNEL_DIM], channel_count as u64);
    group.create_array(CHANNEL_DIM, channel_spec, &channels, &[channel_count as u64])?;

    debug!(
        "{}: wrote coordinates ({} pings, {} channels)",
        group.path(),
        time_steps,
        channel_count
    );
    Ok(())
}
