//! TOML configuration file support.
//!
//! Every key is optional; missing keys keep the library defaults.
//!
//! ```toml
//! # echostore.toml
//! [conversion]
//! budget_mb = 5
//! overwrite = false
//! parallel = true
//! workers = 4
//!
//! [store]
//! compression = "zstd"
//! compression_level = 3
//! byte_stream_split = true
//!
//! [combine]
//! enabled = true
//! remove_sources = true
//! key_attributes = ["sonar_model", "sonar_serial_number"]
//!
//! [params]
//! platform_name = "Bell M. Shimada"
//! survey_name = "2017 Hake Survey"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::combine::CombineConfig;
use crate::convert::{ConversionParams, ConvertConfig};
use crate::store::{CompressionType, StoreConfig};
use crate::writer::WriterConfig;

/// Errors that can occur while loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is not valid TOML for this schema
    #[error("Failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// A value is outside its allowed set
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Root configuration structure for echostore.toml files
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Conversion settings
    #[serde(default)]
    pub conversion: ConversionSection,

    /// Store encoding settings
    #[serde(default)]
    pub store: StoreSection,

    /// Combine settings
    #[serde(default)]
    pub combine: CombineSection,

    /// Metadata written into every converted store
    #[serde(default)]
    pub params: ConversionParams,
}

/// `[conversion]` table
#[derive(Debug, Default, Deserialize)]
pub struct ConversionSection {
    /// Memory budget for one chunk of one field, in megabytes
    pub budget_mb: Option<usize>,

    /// Replace existing outputs
    pub overwrite: Option<bool>,

    /// Convert files concurrently
    pub parallel: Option<bool>,

    /// Worker threads for parallel conversion
    pub workers: Option<usize>,

    /// Write the fields of one group concurrently
    pub parallel_fields: Option<bool>,
}

/// `[store]` table
#[derive(Debug, Default, Deserialize)]
pub struct StoreSection {
    /// `"zstd"`, `"snappy"` or `"none"`
    pub compression: Option<String>,

    /// ZSTD compression level (1-22)
    pub compression_level: Option<i32>,

    /// BYTE_STREAM_SPLIT encoding for float chunks
    pub byte_stream_split: Option<bool>,

    /// Parquet data page size, in bytes
    pub data_page_size: Option<usize>,
}

/// `[combine]` table
#[derive(Debug, Default, Deserialize)]
pub struct CombineSection {
    /// Combine the outputs after conversion
    pub enabled: Option<bool>,

    /// Delete the per-file stores after combining
    pub remove_sources: Option<bool>,

    /// Replace an existing combined store
    pub overwrite: Option<bool>,

    /// Attributes that must agree across sources
    pub key_attributes: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Store encoding with the file's overrides applied
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let mut config = StoreConfig::default();
        let level = self.store.compression_level;
        if let Some(name) = &self.store.compression {
            config.compression = match name.to_ascii_lowercase().as_str() {
                "zstd" => CompressionType::Zstd(level.unwrap_or(3)),
                "snappy" => CompressionType::Snappy,
                "none" | "uncompressed" => CompressionType::Uncompressed,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "unknown compression '{other}'"
                    )))
                }
            };
        } else if let Some(level) = level {
            config.compression = CompressionType::Zstd(level);
        }
        if let Some(split) = self.store.byte_stream_split {
            config.use_byte_stream_split = split;
        }
        if let Some(size) = self.store.data_page_size {
            config.data_page_size = size;
        }
        Ok(config)
    }

    /// Conversion configuration with the file's overrides applied
    pub fn convert_config(&self) -> Result<ConvertConfig, ConfigError> {
        let store = self.store_config()?;

        let mut writer = WriterConfig::default();
        if let Some(budget) = self.conversion.budget_mb {
            writer.budget_mb = budget;
        }
        if let Some(parallel) = self.conversion.parallel_fields {
            writer.parallel_fields = parallel;
        }

        let combine = if self.combine.enabled.unwrap_or(false) {
            let mut combine = CombineConfig {
                store: store.clone(),
                ..CombineConfig::default()
            };
            if let Some(remove) = self.combine.remove_sources {
                combine.remove_sources = remove;
            }
            if let Some(overwrite) = self.combine.overwrite {
                combine.overwrite = overwrite;
            }
            if let Some(keys) = &self.combine.key_attributes {
                combine.key_attributes = keys.clone();
            }
            Some(combine)
        } else {
            None
        };

        let defaults = ConvertConfig::default();
        Ok(ConvertConfig {
            overwrite: self.conversion.overwrite.unwrap_or(defaults.overwrite),
            parallel: self.conversion.parallel.unwrap_or(defaults.parallel),
            workers: self.conversion.workers.unwrap_or(defaults.workers),
            combine,
            store,
            writer,
        })
    }
}
