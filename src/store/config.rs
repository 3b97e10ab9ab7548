use parquet::basic::{Compression, Encoding, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;
use parquet::schema::types::ColumnPath;

use super::metadata::DataType;

/// Name of the single column of every chunk file
pub const VALUES_COLUMN: &str = "values";

/// Compression options for chunk files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// ZSTD compression at the given level
    Zstd(i32),
    /// Snappy compression (faster, slightly larger chunks)
    Snappy,
    /// No compression
    Uncompressed,
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::Zstd(3)
    }
}

impl CompressionType {
    /// Maximum compression (slower write, smallest chunks)
    pub fn max_compression() -> Self {
        Self::Zstd(22)
    }

    /// Fast compression (faster write, larger chunks)
    pub fn fast() -> Self {
        Self::Snappy
    }

    fn to_parquet(self) -> Compression {
        match self {
            CompressionType::Zstd(level) => {
                Compression::ZSTD(ZstdLevel::try_new(level).unwrap_or_default())
            }
            CompressionType::Snappy => Compression::SNAPPY,
            CompressionType::Uncompressed => Compression::UNCOMPRESSED,
        }
    }
}

/// Encoding options applied to every chunk file of a store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Compression codec
    pub compression: CompressionType,

    /// Parquet data page size in bytes
    pub data_page_size: usize,

    /// Use BYTE_STREAM_SPLIT for floating-point columns
    pub use_byte_stream_split: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression: CompressionType::default(),
            data_page_size: 1024 * 1024,
            use_byte_stream_split: true,
        }
    }
}

impl StoreConfig {
    /// Configuration tuned for archival (slow write, small chunks)
    pub fn max_compression() -> Self {
        Self {
            compression: CompressionType::max_compression(),
            data_page_size: 2 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// Configuration tuned for write speed
    pub fn fast_write() -> Self {
        Self {
            compression: CompressionType::fast(),
            data_page_size: 512 * 1024,
            ..Self::default()
        }
    }

    /// Parquet writer properties for a chunk of the given element type
    pub(crate) fn to_writer_properties(&self, dtype: DataType, array: &str) -> WriterProperties {
        let mut builder = WriterProperties::builder()
            .set_compression(self.compression.to_parquet())
            .set_data_page_size_limit(self.data_page_size)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .set_key_value_metadata(Some(vec![KeyValue {
                key: "echostore:array".to_string(),
                value: Some(array.to_string()),
            }]));

        // Sample values are effectively unique; a dictionary only costs time.
        let float_columns: Vec<ColumnPath> = match dtype {
            DataType::Float64 => vec![ColumnPath::new(vec![VALUES_COLUMN.to_string()])],
            DataType::Complex64 => ["real", "imag"]
                .iter()
                .map(|leaf| ColumnPath::new(vec![VALUES_COLUMN.to_string(), leaf.to_string()]))
                .collect(),
            DataType::Int64 | DataType::Utf8 => Vec::new(),
        };

        for col in float_columns {
            builder = builder.set_column_dictionary_enabled(col.clone(), false);
            if self.use_byte_stream_split {
                builder = builder.set_column_encoding(col, Encoding::BYTE_STREAM_SPLIT);
            }
        }

        builder.build()
    }
}
