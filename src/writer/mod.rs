//! # Irregular-Array Chunked Writer
//!
//! This module turns ragged per-ping records into rectangular, chunked
//! store arrays.
//!
//! ## Design Principles
//!
//! 1. **Explicit padding**: records are laid out on a dense
//!    (timestamp × channel) grid and every sample array is right-padded
//!    with NaN to one reference length per field. The store only ever sees
//!    rectangular blocks.
//!
//! 2. **Bounded memory**: the time axis is split into chunks sized from a
//!    memory budget; one chunk is assembled, appended, and persisted before
//!    the next is assembled.
//!
//! 3. **Shared coordinates**: all fields written to one group share one
//!    padded index, stored once as the group's `ping_time` and `channel`
//!    arrays.
//!
//! ## Example
//!
//! ```rust,no_run
//! use echostore::record::{default_dims, DatagramRecord};
//! use echostore::store::Store;
//! use echostore::writer::{write_field, WriterConfig};
//!
//! let store = Store::create("file.zarr")?;
//! let records = vec![
//!     DatagramRecord::new(1_000, "GPT 38 kHz", vec![-60.0, -61.5]),
//!     DatagramRecord::new(2_000, "GPT 38 kHz", vec![-59.0]),
//! ];
//! let stats = write_field(&store, "Beam", "backscatter_r", &records, &default_dims(), &WriterConfig::default())?;
//! println!("{stats}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
mod error;
mod index;
mod partition;
mod ragged;
mod stats;


use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use rayon::prelude::*;

use crate::record::{DatagramRecord, FieldBatch, CHANNEL_DIM, PING_TIME_DIM};
use crate::store::{Group, Store};

pub use config::{WriterConfig, DEFAULT_BUDGET_MB, DEFAULT_COORDINATE_CHUNK_LEN};
pub use error::WriterError;
pub use index::{PaddedIndex, PaddedView};
pub use partition::{chunk_len, ChunkPlan};
pub use stats::{BatchReport, FieldFailure, FieldStats};

/// Write one field's records into `group` of `store`
///
/// The group's coordinates are created from the records, or checked
/// against the records when the group already has them.
pub fn write_field<S: AsRef<str>>(
    store: &Store,
    group: &str,
    field: &str,
    records: &[DatagramRecord],
    dims: &[S],
    config: &WriterConfig,
) -> Result<FieldStats, WriterError> {
    let view = PaddedView::build(field, records, dims)?;
    let aux_names = aux_names(records.iter());
    let taken = taken_names(store, group, [field])?;
    check_aux_names(field, &aux_names, &taken)?;

    let handle = store.require_group(group)?;
    ragged::write_coordinates(&handle, view.index(), config)?;
    let mut stats = write_view(&handle, &view, !aux_names.is_empty(), config)?;
    write_aux(&handle, &view, &aux_names, config, &mut stats)?;
    info!("{stats}");
    Ok(stats)
}

/// Write a set of field batches, sharing one padded index per group
///
/// Failures are collected per field; the batches of other fields and
/// groups are still written.
pub fn write_batches(store: &Store, batches: &[FieldBatch], config: &WriterConfig) -> BatchReport {
    let mut report = BatchReport::default();

    let mut by_group: BTreeMap<&str, Vec<&FieldBatch>> = BTreeMap::new();
    for batch in batches {
        by_group.entry(batch.group.as_str()).or_default().push(batch);
    }

    for (group_name, group_batches) in by_group {
        info!(
            "Writing {} fields to group '{}'",
            group_batches.len(),
            group_name
        );
        write_group(store, group_name, &group_batches, config, &mut report);
    }

    for failed in &report.failed {
        warn!(
            "Failed to write {}/{:?}: {}",
            failed.group, failed.fields, failed.error
        );
    }
    report
}

fn write_group(
    store: &Store,
    group_name: &str,
    batches: &[&FieldBatch],
    config: &WriterConfig,
    report: &mut BatchReport,
) {
    let taken = match taken_names(store, group_name, batches.iter().map(|b| b.field.as_str())) {
        Ok(taken) => taken,
        Err(e) => {
            report.failed.push(failure(group_name, batches, e));
            return;
        }
    };

    let mut valid = Vec::with_capacity(batches.len());
    for &batch in batches {
        let checked = index::check_dims(&batch.field, &batch.dims)
            .and_then(|()| check_aux_names(&batch.field, &batch.aux_names(), &taken));
        match checked {
            Ok(()) => valid.push(batch),
            Err(e) => report.failed.push(failure(group_name, &[batch], e)),
        }
    }
    if valid.is_empty() {
        return;
    }

    // One index over the union of every field's keys
    let index = PaddedIndex::from_keys(
        valid
            .iter()
            .flat_map(|b| b.records.iter())
            .map(|r| (r.timestamp, r.channel.as_str())),
    );

    let prepared = store
        .require_group(group_name)
        .map_err(WriterError::from)
        .and_then(|g| ragged::write_coordinates(&g, &index, config).map(|()| g));
    let group = match prepared {
        Ok(group) => group,
        Err(e) => {
            report.failed.push(failure(group_name, &valid, e));
            return;
        }
    };

    let mut views = Vec::with_capacity(valid.len());
    for &batch in &valid {
        match PaddedView::with_index(&batch.field, &batch.records, &batch.dims, index.clone()) {
            Ok(view) => views.push((batch, view, batch.aux_names())),
            Err(e) => report.failed.push(failure(group_name, &[batch], e)),
        }
    }

    let results: Vec<Result<FieldStats, WriterError>> = if config.parallel_fields {
        views
            .par_iter()
            .map(|(_, view, aux)| write_view(&group, view, !aux.is_empty(), config))
            .collect()
    } else {
        views
            .iter()
            .map(|(_, view, aux)| write_view(&group, view, !aux.is_empty(), config))
            .collect()
    };

    // Each auxiliary scalar is written once, by the first successful batch carrying it
    let mut written_aux: BTreeSet<String> = BTreeSet::new();
    for ((batch, view, aux), result) in views.iter().zip(results) {
        let outcome = result.and_then(|mut stats| {
            let owned: Vec<String> = aux
                .iter()
                .filter(|name| !written_aux.contains(*name))
                .cloned()
                .collect();
            write_aux(&group, view, &owned, config, &mut stats)?;
            Ok(stats)
        });
        match outcome {
            Ok(stats) => {
                info!("{stats}");
                written_aux.extend(stats.aux_fields.iter().cloned());
                report.written.push(stats);
            }
            Err(e) => report.failed.push(failure(group_name, &[*batch], e)),
        }
    }
}

fn failure(group: &str, fields: &[&FieldBatch], error: WriterError) -> FieldFailure {
    FieldFailure {
        group: group.to_string(),
        fields: fields.iter().map(|b| b.field.clone()).collect(),
        error,
    }
}

fn write_view(
    group: &Group,
    view: &PaddedView<'_>,
    has_aux: bool,
    config: &WriterConfig,
) -> Result<FieldStats, WriterError> {
    let reference_length = view.max_sample_length();
    if reference_length == 0 && !has_aux {
        return Err(WriterError::DegenerateInput(format!(
            "field '{}' has no samples and no auxiliary values",
            view.field()
        )));
    }

    let mut stats = FieldStats {
        group: group.path().to_string(),
        field: view.field().to_string(),
        time_steps: view.time_steps(),
        channels: view.channel_count(),
        reference_length,
        chunks_written: 0,
        chunk_len: 0,
        padded_cells: view.padded_cells(),
        aux_fields: Vec::new(),
    };

    // A field of auxiliary scalars only has no sample array
    if reference_length > 0 {
        let written = ragged::write_samples(group, view, reference_length, config)?;
        stats.chunks_written = written.chunks_written;
        stats.chunk_len = written.chunk_len;
    }
    Ok(stats)
}

fn write_aux(
    group: &Group,
    view: &PaddedView<'_>,
    aux_names: &[String],
    config: &WriterConfig,
    stats: &mut FieldStats,
) -> Result<(), WriterError> {
    for name in aux_names {
        let written = ragged::write_aux(group, view, name, config)?;
        if stats.reference_length == 0 {
            stats.chunks_written = written.chunks_written;
            stats.chunk_len = written.chunk_len;
        }
        stats.aux_fields.push(name.clone());
    }
    Ok(())
}

/// Names an auxiliary array may not take in `group`: the coordinates, the
/// fields being written, and every array the group already holds
fn taken_names<'a>(
    store: &Store,
    group: &str,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeSet<String>, WriterError> {
    let mut taken: BTreeSet<String> = [PING_TIME_DIM, CHANNEL_DIM].iter().map(|s| s.to_string()).collect();
    taken.extend(fields.into_iter().map(str::to_string));
    if store.has_group(group) {
        taken.extend(store.group(group)?.array_names()?);
    }
    Ok(taken)
}

fn check_aux_names(field: &str, aux_names: &[String], taken: &BTreeSet<String>) -> Result<(), WriterError> {
    match aux_names.iter().find(|name| taken.contains(*name)) {
        Some(name) => Err(WriterError::ReservedName {
            field: field.to_string(),
            name: name.clone(),
        }),
        None => Ok(()),
    }
}

fn aux_names<'a>(records: impl Iterator<Item = &'a DatagramRecord>) -> Vec<String> {
    let mut names: Vec<String> = records.flat_map(|r| r.aux.keys().cloned()).collect();
    names.sort();
    names.dedup();
    names
}
