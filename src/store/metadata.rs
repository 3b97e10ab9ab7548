//! On-disk node metadata for groups and arrays.
//!
//! Every group directory holds a `group.json`, every array directory an
//! `array.json`. A finalized store additionally carries `consolidated.json`
//! at its root, which snapshots the metadata of every node so readers can
//! open the whole hierarchy with a single file read.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::error::StoreError;

/// Store layout version written into every node's metadata
pub const STORE_FORMAT_VERSION: u32 = 1;

/// File name of a group's metadata
pub const GROUP_METADATA_FILE: &str = "group.json";

/// File name of an array's metadata
pub const ARRAY_METADATA_FILE: &str = "array.json";

/// File name of the consolidated index at the store root
pub const CONSOLIDATED_METADATA_FILE: &str = "consolidated.json";

/// Directory (inside an array) holding chunk files
pub const CHUNK_DIR: &str = "c";

/// Free-form attributes attached to groups and arrays
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Element type of a stored array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 64-bit IEEE float
    Float64,
    /// 64-bit signed integer
    Int64,
    /// UTF-8 string
    Utf8,
    /// Compound `{ real: f32, imag: f32 }` record
    Complex64,
}

impl DataType {
    /// Fill value used when none is specified
    pub fn default_fill_value(&self) -> FillValue {
        match self {
            DataType::Float64 => FillValue::Nan,
            DataType::Int64 => FillValue::Int(0),
            DataType::Utf8 => FillValue::Text(String::new()),
            DataType::Complex64 => FillValue::None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float64 => "float64",
            DataType::Int64 => "int64",
            DataType::Utf8 => "utf8",
            DataType::Complex64 => "complex64",
        };
        f.write_str(name)
    }
}

/// Value reported for elements that were never written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillValue {
    /// Not-a-number (floating point arrays)
    Nan,
    /// Integer fill
    Int(i64),
    /// Text fill
    Text(String),
    /// No fill value; padding falls back to the type's zero value
    None,
}

/// Metadata of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    /// Store layout version
    pub format_version: u32,
    /// Group attributes
    #[serde(default)]
    pub attributes: Attributes,
}

impl GroupMetadata {
    /// Create group metadata with the given attributes
    pub fn new(attributes: Attributes) -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            attributes,
        }
    }
}

/// Metadata of one array
///
/// Arrays are chunked along axis 0 only: `chunks[0]` rows per chunk file,
/// every other axis stored at full extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    /// Store layout version
    pub format_version: u32,
    /// Current extent of every axis
    pub shape: Vec<u64>,
    /// Declared chunk shape (storage granularity)
    pub chunks: Vec<u64>,
    /// Dimension names, one per axis
    pub dimensions: Vec<String>,
    /// Element type
    pub dtype: DataType,
    /// Fill value for unwritten or padded elements
    pub fill_value: FillValue,
    /// Array attributes
    #[serde(default)]
    pub attributes: Attributes,
}

impl ArrayMetadata {
    /// Number of axes
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extents of every axis after the first
    pub fn trailing_shape(&self) -> &[u64] {
        self.shape.get(1..).unwrap_or(&[])
    }

    /// Number of elements in one row (one step along axis 0)
    pub fn row_len(&self) -> usize {
        self.trailing_shape().iter().product::<u64>() as usize
    }

    /// Rows stored per chunk file
    pub fn chunk_rows(&self) -> u64 {
        self.chunks.first().copied().unwrap_or(1)
    }

    /// Number of chunk files backing the current extent
    pub fn num_chunks(&self) -> u64 {
        let rows = self.shape.first().copied().unwrap_or(0);
        let chunk_rows = self.chunk_rows();
        (rows + chunk_rows - 1) / chunk_rows
    }

    /// Total number of elements
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product::<u64>() as usize
    }

    /// Check the invariants the chunk grid relies on
    pub(crate) fn validate(&self, array: &str) -> Result<(), StoreError> {
        let unsupported = |reason: String| StoreError::UnsupportedChunking {
            array: array.to_string(),
            reason,
        };

        if self.shape.is_empty() {
            return Err(unsupported("arrays must have at least one axis".to_string()));
        }
        if self.chunks.len() != self.shape.len() {
            return Err(unsupported(format!(
                "chunk rank {} does not match array rank {}",
                self.chunks.len(),
                self.shape.len()
            )));
        }
        if self.dimensions.len() != self.shape.len() {
            return Err(unsupported(format!(
                "{} dimension names for {} axes",
                self.dimensions.len(),
                self.shape.len()
            )));
        }
        if self.chunk_rows() == 0 {
            return Err(unsupported("chunk length along axis 0 must be at least 1".to_string()));
        }
        if self.chunks[1..] != self.shape[1..] {
            return Err(unsupported(format!(
                "only axis 0 may be chunked: chunks {:?} vs shape {:?}",
                self.chunks, self.shape
            )));
        }
        Ok(())
    }
}

/// Metadata of any node in the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeMetadata {
    /// A group node
    Group(GroupMetadata),
    /// An array node
    Array(ArrayMetadata),
}

/// Snapshot of every node's metadata, keyed by node path (`""` is the root)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedMetadata {
    /// Store layout version
    pub format_version: u32,
    /// Node metadata keyed by path
    pub nodes: BTreeMap<String, NodeMetadata>,
}

impl ConsolidatedMetadata {
    /// Direct children of `parent`, in path order
    pub fn children<'a>(
        &'a self,
        parent: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a NodeMetadata)> + 'a {
        self.nodes.iter().filter_map(move |(path, node)| {
            let name = if parent.is_empty() {
                path.as_str()
            } else {
                path.strip_prefix(parent)?.strip_prefix('/')?
            };
            if name.is_empty() || name.contains('/') {
                None
            } else {
                Some((name, node))
            }
        })
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::InvalidFormat(format!("no parent for {}", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::IoError(e.error))?;
    Ok(())
}

/// Read and deserialize a JSON metadata file
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_metadata(shape: Vec<u64>, chunks: Vec<u64>) -> ArrayMetadata {
        ArrayMetadata {
            format_version: STORE_FORMAT_VERSION,
            dimensions: (0..shape.len()).map(|i| format!("d{i}")).collect(),
            shape,
            chunks,
            dtype: DataType::Float64,
            fill_value: FillValue::Nan,
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn test_num_chunks_rounds_up() {
        let meta = array_metadata(vec![7, 2, 4], vec![3, 2, 4]);
        assert_eq!(meta.num_chunks(), 3);
        assert_eq!(meta.row_len(), 8);
        assert_eq!(meta.num_elements(), 56);
        assert!(meta.validate("a").is_ok());
    }

    #[test]
    fn test_validate_rejects_chunked_trailing_axis() {
        let meta = array_metadata(vec![7, 2, 4], vec![3, 1, 4]);
        assert!(matches!(
            meta.validate("a"),
            Err(StoreError::UnsupportedChunking { .. })
        ));
    }

    #[test]
    fn test_fill_value_serialization() {
        assert_eq!(serde_json::to_string(&FillValue::Nan).unwrap(), "\"nan\"");
        assert_eq!(
            serde_json::to_string(&FillValue::Int(-1)).unwrap(),
            "{\"int\":-1}"
        );
        assert_eq!(
            serde_json::to_string(&DataType::Complex64).unwrap(),
            "\"complex64\""
        );
    }

    #[test]
    fn test_consolidated_children() {
        let mut nodes = BTreeMap::new();
        let group = NodeMetadata::Group(GroupMetadata::new(Attributes::new()));
        nodes.insert(String::new(), group.clone());
        nodes.insert("Platform".to_string(), group.clone());
        nodes.insert("Platform/NMEA".to_string(), group.clone());
        nodes.insert("Sonar".to_string(), group);
        let consolidated = ConsolidatedMetadata {
            format_version: STORE_FORMAT_VERSION,
            nodes,
        };

        let root: Vec<&str> = consolidated.children("").map(|(n, _)| n).collect();
        assert_eq!(root, vec!["Platform", "Sonar"]);
        let platform: Vec<&str> = consolidated.children("Platform").map(|(n, _)| n).collect();
        assert_eq!(platform, vec!["NMEA"]);
    }
}
