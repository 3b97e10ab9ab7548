//! Parquet codec for a single chunk file.
//!
//! A chunk holds the rows `[k * chunk_rows, (k + 1) * chunk_rows)` of an
//! array, flattened in row-major order into one `values` column. Chunk
//! files are written to a temporary file in the same directory, synced,
//! and renamed into place, so a reader never observes a half-written chunk.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int64Array, StringArray, StructArray};
use arrow::datatypes::{DataType as ArrowDataType, Field, Fields, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tempfile::NamedTempFile;

use super::config::{StoreConfig, VALUES_COLUMN};
use super::data::{ArrayData, Complex64};
use super::error::StoreError;
use super::metadata::{DataType, CHUNK_DIR};

/// Path of chunk `index` inside an array directory
pub(crate) fn chunk_path(array_dir: &Path, index: u64) -> PathBuf {
    array_dir.join(CHUNK_DIR).join(format!("{index}.parquet"))
}

fn complex_fields() -> Fields {
    Fields::from(vec![
        Field::new("real", ArrowDataType::Float32, false),
        Field::new("imag", ArrowDataType::Float32, false),
    ])
}

fn arrow_type(dtype: DataType) -> ArrowDataType {
    match dtype {
        DataType::Float64 => ArrowDataType::Float64,
        DataType::Int64 => ArrowDataType::Int64,
        DataType::Utf8 => ArrowDataType::Utf8,
        DataType::Complex64 => ArrowDataType::Struct(complex_fields()),
    }
}

fn to_arrow(data: &ArrayData) -> Result<ArrayRef, StoreError> {
    let array: ArrayRef = match data {
        ArrayData::Float64(v) => Arc::new(Float64Array::from(v.clone())),
        ArrayData::Int64(v) => Arc::new(Int64Array::from(v.clone())),
        ArrayData::Utf8(v) => Arc::new(StringArray::from(v.clone())),
        ArrayData::Complex64(v) => {
            let real: Float32Array = v.iter().map(|c| c.real).collect::<Vec<_>>().into();
            let imag: Float32Array = v.iter().map(|c| c.imag).collect::<Vec<_>>().into();
            Arc::new(StructArray::try_new(
                complex_fields(),
                vec![Arc::new(real) as ArrayRef, Arc::new(imag) as ArrayRef],
                None,
            )?)
        }
    };
    Ok(array)
}

/// Encode `data` as chunk `index` of the array at `array_dir`
pub(crate) fn write_chunk(
    array_dir: &Path,
    array_name: &str,
    index: u64,
    data: &ArrayData,
    config: &StoreConfig,
) -> Result<(), StoreError> {
    let dir = array_dir.join(CHUNK_DIR);
    fs::create_dir_all(&dir)?;

    let dtype = data.dtype();
    let schema = Arc::new(Schema::new(vec![Field::new(
        VALUES_COLUMN,
        arrow_type(dtype),
        false,
    )]));
    let batch = RecordBatch::try_new(schema.clone(), vec![to_arrow(data)?])?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    let props = config.to_writer_properties(dtype, array_name);
    let mut writer = ArrowWriter::try_new(&mut tmp, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    tmp.as_file().sync_all()?;
    tmp.persist(chunk_path(array_dir, index))
        .map_err(|e| StoreError::IoError(e.error))?;
    Ok(())
}

/// Decode chunk `index` of the array at `array_dir`
pub(crate) fn read_chunk(
    array_dir: &Path,
    array_name: &str,
    index: u64,
    dtype: DataType,
) -> Result<ArrayData, StoreError> {
    let path = chunk_path(array_dir, index);
    if !path.exists() {
        return Err(StoreError::NotFound(format!(
            "chunk {index} of array '{array_name}'"
        )));
    }
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;

    let mut out = ArrayData::empty(dtype);
    for batch in reader {
        let batch = batch?;
        let column = batch.column_by_name(VALUES_COLUMN).ok_or_else(|| {
            StoreError::InvalidFormat(format!(
                "chunk {} has no '{VALUES_COLUMN}' column",
                path.display()
            ))
        })?;
        append_column(&mut out, column.as_ref(), array_name)?;
    }
    Ok(out)
}

fn append_column(out: &mut ArrayData, column: &dyn Array, array_name: &str) -> Result<(), StoreError> {
    let expected = out.dtype();
    let wrong_type = || {
        StoreError::InvalidFormat(format!(
            "chunk column of array '{array_name}' has type {}, expected {expected}",
            column.data_type(),
        ))
    };

    match out {
        ArrayData::Float64(values) => {
            let col = column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(wrong_type)?;
            values.extend(col.values().iter().copied());
        }
        ArrayData::Int64(values) => {
            let col = column
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(wrong_type)?;
            values.extend(col.values().iter().copied());
        }
        ArrayData::Utf8(values) => {
            let col = column
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(wrong_type)?;
            values.extend(col.iter().map(|s| s.unwrap_or_default().to_string()));
        }
        ArrayData::Complex64(values) => {
            let col = column
                .as_any()
                .downcast_ref::<StructArray>()
                .ok_or_else(wrong_type)?;
            let leaf = |name: &str| {
                col.column_by_name(name)
                    .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                    .ok_or_else(wrong_type)
            };
            let real = leaf("real")?;
            let imag = leaf("imag")?;
            values.extend(
                real.values()
                    .iter()
                    .zip(imag.values().iter())
                    .map(|(&r, &i)| Complex64::new(r, i)),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_chunk_preserves_nan_padding() -> Result<(), StoreError> {
        let dir = tempdir()?;
        let data = ArrayData::Float64(vec![1.0, f64::NAN, -2.5, f64::NAN]);
        write_chunk(dir.path(), "Beam/backscatter_r", 0, &data, &StoreConfig::default())?;

        let read = read_chunk(dir.path(), "Beam/backscatter_r", 0, DataType::Float64)?;
        let values = read.as_f64().unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], -2.5);
        assert!(values[3].is_nan());
        Ok(())
    }

    #[test]
    fn test_complex_chunk_uses_struct_schema() -> Result<(), StoreError> {
        let dir = tempdir()?;
        let data = ArrayData::Complex64(vec![Complex64::new(0.5, -0.25), Complex64::new(1.0, 2.0)]);
        write_chunk(dir.path(), "Vendor/coefficients", 3, &data, &StoreConfig::fast_write())?;

        assert!(chunk_path(dir.path(), 3).exists());
        let read = read_chunk(dir.path(), "Vendor/coefficients", 3, DataType::Complex64)?;
        assert_eq!(read, data);
        Ok(())
    }

    #[test]
    fn test_read_with_wrong_dtype_is_invalid() -> Result<(), StoreError> {
        let dir = tempdir()?;
        let data = ArrayData::Int64(vec![1, 2, 3]);
        write_chunk(dir.path(), "t", 0, &data, &StoreConfig::default())?;

        let result = read_chunk(dir.path(), "t", 0, DataType::Float64);
        match result {
            Err(StoreError::InvalidFormat(message)) => {
                assert!(message.contains("expected float64"), "{message}");
            }
            other => panic!("expected InvalidFormat, got {other:?}"),
        }

        // The same chunk still reads under its own type
        assert_eq!(read_chunk(dir.path(), "t", 0, DataType::Int64)?, data);
        Ok(())
    }

    #[test]
    fn test_missing_chunk_is_not_found() {
        let dir = tempdir().unwrap();
        let result = read_chunk(dir.path(), "t", 0, DataType::Utf8);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
