use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::chunk::{read_chunk, write_chunk};
use super::config::StoreConfig;
use super::data::ArrayData;
use super::error::StoreError;
use super::metadata::{
    read_json, write_json_atomic, ArrayMetadata, Attributes, DataType, FillValue,
    ARRAY_METADATA_FILE, STORE_FORMAT_VERSION,
};

/// Everything needed to create an array besides its initial data
#[derive(Debug, Clone)]
pub struct ArraySpec {
    /// Element type
    pub dtype: DataType,
    /// Dimension names, one per axis; the first is the append axis
    pub dimensions: Vec<String>,
    /// Rows per chunk file along the first axis
    pub chunk_rows: u64,
    /// Fill value for padded elements
    pub fill_value: FillValue,
    /// Array attributes
    pub attributes: Attributes,
}

impl ArraySpec {
    /// Spec with the type's default fill value and no attributes
    pub fn new<S: AsRef<str>>(dtype: DataType, dimensions: &[S], chunk_rows: u64) -> Self {
        Self {
            dtype,
            dimensions: dimensions.iter().map(|d| d.as_ref().to_string()).collect(),
            chunk_rows,
            fill_value: dtype.default_fill_value(),
            attributes: Attributes::new(),
        }
    }

    /// Override the fill value
    pub fn with_fill_value(mut self, fill_value: FillValue) -> Self {
        self.fill_value = fill_value;
        self
    }

    /// Replace the attributes
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Spec reproducing an existing array's layout, with a new chunk length
    pub fn like(metadata: &ArrayMetadata, chunk_rows: u64) -> Self {
        Self {
            dtype: metadata.dtype,
            dimensions: metadata.dimensions.clone(),
            chunk_rows,
            fill_value: metadata.fill_value.clone(),
            attributes: metadata.attributes.clone(),
        }
    }
}

/// Handle to one array of a store
///
/// Arrays only ever grow along their first axis. Every other axis is fixed
/// when the array is created.
#[derive(Debug, Clone)]
pub struct ArrayHandle {
    dir: PathBuf,
    path: String,
    metadata: ArrayMetadata,
    config: StoreConfig,
    writable: bool,
}

impl ArrayHandle {
    /// Create the array directory and write `initial` (of `initial_shape`) as its first rows
    pub(crate) fn create(
        dir: PathBuf,
        path: String,
        spec: ArraySpec,
        initial: &ArrayData,
        initial_shape: &[u64],
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        if dir.exists() {
            return Err(StoreError::AlreadyExists(path));
        }

        let mut shape = initial_shape.to_vec();
        let mut chunks = initial_shape.to_vec();
        if let Some(rows) = shape.first_mut() {
            *rows = 0;
        }
        if let Some(rows) = chunks.first_mut() {
            *rows = spec.chunk_rows;
        }

        let metadata = ArrayMetadata {
            format_version: STORE_FORMAT_VERSION,
            shape,
            chunks,
            dimensions: spec.dimensions,
            dtype: spec.dtype,
            fill_value: spec.fill_value,
            attributes: spec.attributes,
        };
        metadata.validate(&path)?;

        fs::create_dir_all(&dir)?;
        write_json_atomic(&dir.join(ARRAY_METADATA_FILE), &metadata)?;

        let mut handle = Self {
            dir,
            path,
            metadata,
            config,
            writable: true,
        };
        handle.append(initial, initial_shape)?;
        Ok(handle)
    }

    /// Open an existing array from its directory
    pub(crate) fn open(
        dir: PathBuf,
        path: String,
        metadata: Option<ArrayMetadata>,
        config: StoreConfig,
        writable: bool,
    ) -> Result<Self, StoreError> {
        let metadata = match metadata {
            Some(metadata) => metadata,
            None => {
                let file = dir.join(ARRAY_METADATA_FILE);
                if !file.exists() {
                    return Err(StoreError::NotFound(format!("array '{path}'")));
                }
                read_json(&file)?
            }
        };
        metadata.validate(&path)?;
        Ok(Self {
            dir,
            path,
            metadata,
            config,
            writable,
        })
    }

    /// Node path inside the store (e.g. `Beam/backscatter_r`)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Array name (last path component)
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Directory holding this array
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full metadata
    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    /// Current extent of every axis
    pub fn shape(&self) -> &[u64] {
        &self.metadata.shape
    }

    /// Declared chunk shape
    pub fn chunks(&self) -> &[u64] {
        &self.metadata.chunks
    }

    /// Dimension names
    pub fn dimensions(&self) -> &[String] {
        &self.metadata.dimensions
    }

    /// Element type
    pub fn dtype(&self) -> DataType {
        self.metadata.dtype
    }

    /// Fill value
    pub fn fill_value(&self) -> &FillValue {
        &self.metadata.fill_value
    }

    /// Array attributes
    pub fn attributes(&self) -> &Attributes {
        &self.metadata.attributes
    }

    /// Number of chunk files backing the array
    pub fn num_chunks(&self) -> u64 {
        self.metadata.num_chunks()
    }

    /// Decode one chunk
    pub fn read_chunk(&self, index: u64) -> Result<ArrayData, StoreError> {
        let expected_rows = self.chunk_row_count(index)?;
        let data = read_chunk(&self.dir, &self.path, index, self.metadata.dtype)?;
        let expected = expected_rows as usize * self.metadata.row_len();
        if data.len() != expected {
            return Err(StoreError::LengthMismatch {
                array: self.path.clone(),
                expected,
                found: data.len(),
            });
        }
        Ok(data)
    }

    /// Decode the whole array into one row-major buffer
    pub fn read(&self) -> Result<ArrayData, StoreError> {
        let mut out = ArrayData::with_capacity(self.metadata.dtype, self.metadata.num_elements());
        for index in 0..self.num_chunks() {
            let chunk = self.read_chunk(index)?;
            out.extend_from(&chunk, 0..chunk.len())?;
        }
        Ok(out)
    }

    /// Shape of chunk `index`; the last chunk may hold fewer rows
    pub fn chunk_shape(&self, index: u64) -> Result<Vec<u64>, StoreError> {
        let mut shape = self.metadata.shape.clone();
        shape[0] = self.chunk_row_count(index)?;
        Ok(shape)
    }

    fn chunk_row_count(&self, index: u64) -> Result<u64, StoreError> {
        let rows = self.metadata.shape[0];
        let chunk_rows = self.metadata.chunk_rows();
        let start = index * chunk_rows;
        if start >= rows {
            return Err(StoreError::NotFound(format!(
                "chunk {index} of array '{}' ({rows} rows)",
                self.path
            )));
        }
        Ok(chunk_rows.min(rows - start))
    }

    /// Append a block of `block_shape` along the first axis
    ///
    /// Every axis but the first must equal the array's established extent.
    /// The trailing partial chunk, if any, is rewritten with the new rows.
    pub fn append(&mut self, data: &ArrayData, block_shape: &[u64]) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly(self.path.clone()));
        }
        if data.dtype() != self.metadata.dtype {
            return Err(StoreError::DataTypeMismatch {
                array: self.path.clone(),
                expected: self.metadata.dtype,
                found: data.dtype(),
            });
        }
        if block_shape.len() != self.metadata.rank()
            || block_shape[1..] != *self.metadata.trailing_shape()
        {
            return Err(StoreError::ShapeMismatch {
                array: self.path.clone(),
                expected: self.metadata.trailing_shape().to_vec(),
                found: block_shape.get(1..).unwrap_or(&[]).to_vec(),
            });
        }
        let expected = block_shape.iter().product::<u64>() as usize;
        if data.len() != expected {
            return Err(StoreError::LengthMismatch {
                array: self.path.clone(),
                expected,
                found: data.len(),
            });
        }

        let rows = block_shape[0];
        if rows == 0 {
            return Ok(());
        }

        let row_len = self.metadata.row_len();
        let chunk_rows = self.metadata.chunk_rows();
        let current = self.metadata.shape[0];
        let mut written = 0u64;

        let partial = current % chunk_rows;
        if partial != 0 {
            let index = current / chunk_rows;
            let take = (chunk_rows - partial).min(rows);
            let mut chunk = self.read_chunk(index)?;
            chunk.extend_from(data, 0..take as usize * row_len)?;
            write_chunk(&self.dir, &self.path, index, &chunk, &self.config)?;
            debug!("{}: extended chunk {} by {} rows", self.path, index, take);
            written = take;
        }

        while written < rows {
            let index = (current + written) / chunk_rows;
            let take = chunk_rows.min(rows - written);
            let start = written as usize * row_len;
            let end = start + take as usize * row_len;
            write_chunk(&self.dir, &self.path, index, &data.slice(start..end), &self.config)?;
            debug!("{}: wrote chunk {} ({} rows)", self.path, index, take);
            written += take;
        }

        self.metadata.shape[0] = current + rows;
        write_json_atomic(&self.dir.join(ARRAY_METADATA_FILE), &self.metadata)?;
        Ok(())
    }
}
