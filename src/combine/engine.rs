//! Group merge operations.
//!
//! Each function merges one group of N ordered source stores into the
//! destination store. Opening the source arrays fans out over the sources;
//! data is then streamed chunk by chunk, in order, into a single create
//! followed by appends.

use std::cmp::Ordering;

use log::debug;
use rayon::prelude::*;

use crate::store::{
    ArrayData, ArrayHandle, ArrayMetadata, ArraySpec, Attributes, Complex64, DataType, Group,
    Store, StoreError,
};

use super::policy::ConcatOrder;

/// Counts of what a merge wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    /// Arrays concatenated along time
    pub concatenated: usize,
    /// Arrays copied from one source
    pub copied: usize,
}

impl MergeCounts {
    pub(crate) fn add(&mut self, other: MergeCounts) {
        self.concatenated += other.concatenated;
        self.copied += other.copied;
    }
}

/// Returns true if `dim` names a time axis (`time` or `*_time`)
pub fn is_time_dim(dim: &str) -> bool {
    dim == "time" || dim.ends_with("_time")
}

/// Copy the first source's group (metadata file and arrays) verbatim
pub(crate) fn copy_first(dest: &Store, first: &Group) -> Result<MergeCounts, StoreError> {
    let copied = first.array_names()?.len();
    dest.copy_group_shallow(first)?;
    Ok(MergeCounts {
        concatenated: 0,
        copied,
    })
}

/// Concatenate a group of several sources along time
///
/// Attributes and non-time arrays come from the first source in order.
pub(crate) fn concat_time(
    dest: &Store,
    sources: &[Group],
    order: ConcatOrder,
) -> Result<MergeCounts, StoreError> {
    let ordered = order_sources(sources, order)?;
    let first = ordered[0];

    let mut group = dest.require_group(first.path())?;
    group.set_attributes(first.attributes().clone())?;

    let mut counts = MergeCounts::default();
    for name in first.array_names()? {
        let template = first.array(&name)?;
        let leading = template.dimensions().first().map(String::as_str).unwrap_or("");
        if is_time_dim(leading) {
            concat_array(&group, &ordered, &template, order)?;
            counts.concatenated += 1;
        } else {
            group.copy_array_from(&template)?;
            counts.copied += 1;
        }
    }
    debug!(
        "{}: concatenated {} arrays, copied {}",
        first.path(),
        counts.concatenated,
        counts.copied
    );
    Ok(counts)
}

/// Stream one array of every source into the destination, chunk by chunk
///
/// Only the per-source metadata survey fans out; at most one source chunk
/// is held in memory at a time.
fn concat_array(
    dest: &Group,
    sources: &[&Group],
    template: &ArrayHandle,
    order: ConcatOrder,
) -> Result<(), StoreError> {
    let name = template.name();
    let handles = sources
        .par_iter()
        .map(|g| g.array(name))
        .collect::<Result<Vec<_>, _>>()?;

    for handle in &handles {
        if handle.dtype() != template.dtype() || handle.dimensions() != template.dimensions() {
            return Err(StoreError::InvalidFormat(format!(
                "cannot concatenate {} ({} {:?}) with {} ({} {:?})",
                template.path(),
                template.dtype(),
                template.dimensions(),
                handle.path(),
                handle.dtype(),
                handle.dimensions()
            )));
        }
        if order == ConcatOrder::Nested && handle.shape()[1..] != template.shape()[1..] {
            return Err(StoreError::ShapeMismatch {
                array: handle.path().to_string(),
                expected: template.shape()[1..].to_vec(),
                found: handle.shape()[1..].to_vec(),
            });
        }
    }

    // Outer join on every non-time axis
    let rank = template.shape().len();
    let mut trailing = vec![0u64; rank - 1];
    for handle in &handles {
        for (axis, extent) in handle.shape()[1..].iter().enumerate() {
            trailing[axis] = trailing[axis].max(*extent);
        }
    }

    let fill = template.fill_value().clone();
    let mut empty_shape = Vec::with_capacity(rank);
    empty_shape.push(0);
    empty_shape.extend_from_slice(&trailing);
    let spec = ArraySpec::like(template.metadata(), template.chunks()[0]);
    let mut array = dest.create_array(name, spec, &ArrayData::empty(template.dtype()), &empty_shape)?;

    for handle in &handles {
        for index in 0..handle.num_chunks() {
            let shape = handle.chunk_shape(index)?;
            let mut target = Vec::with_capacity(rank);
            target.push(shape[0]);
            target.extend_from_slice(&trailing);
            let chunk = handle.read_chunk(index)?;
            if shape == target {
                array.append(&chunk, &target)?;
            } else {
                array.append(&chunk.pad_to(&shape, &target, &fill)?, &target)?;
            }
        }
    }
    debug!("{}: {} rows from {} sources", array.path(), array.shape()[0], handles.len());
    Ok(())
}

/// Sort key of a source: the first value of its time coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeKey {
    Int(i64),
    Float(f64),
}

fn order_sources(sources: &[Group], order: ConcatOrder) -> Result<Vec<&Group>, StoreError> {
    let in_order: Vec<&Group> = sources.iter().collect();
    if order != ConcatOrder::ByTime {
        return Ok(in_order);
    }

    let keys = sources
        .par_iter()
        .map(first_time_value)
        .collect::<Result<Vec<_>, StoreError>>()?;

    let comparable = match keys.first() {
        Some(Some(TimeKey::Int(_))) => keys.iter().all(|k| matches!(k, Some(TimeKey::Int(_)))),
        Some(Some(TimeKey::Float(_))) => keys.iter().all(|k| matches!(k, Some(TimeKey::Float(_)))),
        _ => false,
    };
    if !comparable {
        debug!("time coordinates missing or mixed; keeping source order");
        return Ok(in_order);
    }

    let mut indexed: Vec<(usize, TimeKey)> = keys.into_iter().flatten().enumerate().collect();
    indexed.sort_by(|(_, a), (_, b)| match (a, b) {
        (TimeKey::Int(a), TimeKey::Int(b)) => a.cmp(b),
        (TimeKey::Float(a), TimeKey::Float(b)) => a.total_cmp(b),
        _ => Ordering::Equal,
    });
    Ok(indexed.into_iter().map(|(i, _)| &sources[i]).collect())
}

/// First value of the group's one-dimensional time coordinate, if any
fn first_time_value(group: &Group) -> Result<Option<TimeKey>, StoreError> {
    for name in group.array_names()? {
        if !is_time_dim(&name) {
            continue;
        }
        let array = group.array(&name)?;
        if array.dimensions() != [name.as_str()] || array.shape()[0] == 0 {
            continue;
        }
        let key = match array.read_chunk(0)? {
            ArrayData::Int64(values) => values.first().copied().map(TimeKey::Int),
            ArrayData::Float64(values) => values.first().copied().map(TimeKey::Float),
            _ => None,
        };
        return Ok(key);
    }
    Ok(None)
}

/// The compound filter-coefficient arrays of a vendor group
///
/// Read through an explicit `{ real: f32, imag: f32 }` schema together with
/// the group's attributes (the decimation values).
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCoefficientBlock {
    /// Group attributes
    pub attributes: Attributes,
    /// Complex arrays: name, metadata, and elements
    pub arrays: Vec<(String, ArrayMetadata, Vec<Complex64>)>,
}

impl FilterCoefficientBlock {
    /// Read every complex array of `group`
    pub fn read(group: &Group) -> Result<Self, StoreError> {
        let mut arrays = Vec::new();
        for name in group.array_names()? {
            let handle = group.array(&name)?;
            if handle.dtype() != DataType::Complex64 {
                continue;
            }
            let values = match handle.read()? {
                ArrayData::Complex64(values) => values,
                other => {
                    return Err(StoreError::DataTypeMismatch {
                        array: handle.path().to_string(),
                        expected: DataType::Complex64,
                        found: other.dtype(),
                    })
                }
            };
            arrays.push((name, handle.metadata().clone(), values));
        }
        Ok(Self {
            attributes: group.attributes().clone(),
            arrays,
        })
    }

    /// Write the block into `group`, replacing its attributes
    pub fn write(&self, group: &mut Group) -> Result<usize, StoreError> {
        group.set_attributes(self.attributes.clone())?;
        for (name, metadata, values) in &self.arrays {
            let spec = ArraySpec::like(metadata, metadata.chunk_rows());
            group.create_array(name, spec, &ArrayData::Complex64(values.clone()), &metadata.shape)?;
        }
        Ok(self.arrays.len())
    }
}

/// Copy the first source's filter coefficients into the destination
///
/// Arrays already present in the destination group are left alone.
pub(crate) fn copy_binary_block(dest: &Store, first: &Group) -> Result<MergeCounts, StoreError> {
    let mut block = FilterCoefficientBlock::read(first)?;
    let mut group = dest.require_group(first.path())?;
    block.arrays.retain(|(name, _, _)| !group.has_array(name));
    let copied = block.write(&mut group)?;
    Ok(MergeCounts {
        concatenated: 0,
        copied,
    })
}
