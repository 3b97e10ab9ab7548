//! # Conversion Orchestration
//!
//! Drives a [`DatagramParser`] over a set of raw files, writes one store
//! per file, and optionally combines the stores afterwards.
//!
//! For each file:
//!
//! 1. The output `<save dir>/<stem>.zarr` is skipped when it already
//!    exists (or removed first with `overwrite`).
//! 2. The parser turns the raw file into metadata groups and field batches.
//! 3. Root attributes (including `sonar_model`), `Provenance`, the parser's
//!    metadata groups and the user's [`ConversionParams`] are written.
//! 4. The field batches go through [`crate::writer::write_batches`].
//! 5. The store is finalized.
//!
//! A file that fails does not stop the others. Combining only runs when
//! every file converted.

mod error;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::combine::{
    CombineConfig, CombineOutcome, SkipReason, SonarModel, StoreCombiner, SONAR_MODEL_ATTRIBUTE,
};
use crate::record::FieldBatch;
use crate::store::{remove_store, ArrayData, ArraySpec, Attributes, Store, StoreConfig};
use crate::writer::{write_batches, BatchReport, WriterConfig};

pub use error::{ConvertError, ParseError};

/// File extension of converted stores
pub const STORE_EXTENSION: &str = "zarr";

/// Name of the provenance group
pub const PROVENANCE_GROUP: &str = "Provenance";

/// Name of the platform group
pub const PLATFORM_GROUP: &str = "Platform";

/// One array of a metadata group, ready to be written
#[derive(Debug, Clone)]
pub struct ArrayPayload {
    /// Array name
    pub name: String,
    /// Layout of the array
    pub spec: ArraySpec,
    /// Row-major elements
    pub data: ArrayData,
    /// Shape of `data`
    pub shape: Vec<u64>,
}

impl ArrayPayload {
    /// A payload holding `data` of `shape`
    pub fn new(name: impl Into<String>, spec: ArraySpec, data: ArrayData, shape: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            spec,
            data,
            shape,
        }
    }
}

/// A metadata group produced by a parser
#[derive(Debug, Clone, Default)]
pub struct GroupPayload {
    /// Group path (`""` is the root)
    pub path: String,
    /// Group attributes
    pub attributes: Attributes,
    /// Arrays already laid out by the parser
    pub arrays: Vec<ArrayPayload>,
}

impl GroupPayload {
    /// An empty payload for the group at `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add one attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add one array
    pub fn with_array(mut self, array: ArrayPayload) -> Self {
        self.arrays.push(array);
        self
    }
}

/// Everything a parser extracted from one raw file
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    /// Metadata groups
    pub groups: Vec<GroupPayload>,
    /// Per-ping records, one batch per field
    pub batches: Vec<FieldBatch>,
    /// Extra stores the parser wrote next to the output
    pub auxiliary_outputs: Vec<PathBuf>,
}

/// Turns one raw instrument file into groups and field batches
pub trait DatagramParser: Send + Sync {
    /// Instrument model of the files this parser reads
    fn sonar_model(&self) -> SonarModel;

    /// Parse one raw file
    ///
    /// `output` is where the store for this file will be written, for
    /// parsers that produce auxiliary stores next to it.
    fn parse(&self, source: &Path, output: &Path) -> Result<ParsedFile, ParseError>;
}

/// User-supplied metadata written into every converted store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionParams {
    /// Platform (vessel or mooring) name
    pub platform_name: Option<String>,
    /// ICES platform code
    #[serde(rename = "platform_code_ICES", alias = "platform_code_ices")]
    pub platform_code_ices: Option<String>,
    /// Platform type
    pub platform_type: Option<String>,
    /// Water level, in meters
    pub water_level: Option<f64>,
    /// Survey name
    pub survey_name: Option<String>,
    /// Any other key, written to the root group
    #[serde(flatten)]
    pub extra: Attributes,
}

impl ConversionParams {
    /// Attributes for the `Platform` group
    pub fn platform_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        let strings = [
            ("platform_name", &self.platform_name),
            ("platform_code_ICES", &self.platform_code_ices),
            ("platform_type", &self.platform_type),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                attributes.insert(key.to_string(), Value::from(value.as_str()));
            }
        }
        if let Some(level) = self.water_level {
            attributes.insert("water_level".to_string(), Value::from(level));
        }
        attributes
    }

    /// Attributes for the root group
    pub fn root_attributes(&self) -> Attributes {
        let mut attributes = self.extra.clone();
        if let Some(survey) = &self.survey_name {
            attributes.insert("survey_name".to_string(), Value::from(survey.as_str()));
        }
        attributes
    }
}

/// Configuration for a conversion run
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Replace existing outputs instead of skipping them
    pub overwrite: bool,

    /// Convert files concurrently
    pub parallel: bool,

    /// Worker threads when `parallel` (0 lets rayon decide)
    pub workers: usize,

    /// Combine the outputs afterwards
    pub combine: Option<CombineConfig>,

    /// Encoding of the output stores
    pub store: StoreConfig,

    /// Chunking and field concurrency
    pub writer: WriterConfig,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            parallel: false,
            workers: 0,
            combine: None,
            store: StoreConfig::default(),
            writer: WriterConfig::default(),
        }
    }
}

/// Statistics from one converted file
#[derive(Debug)]
pub struct FileReport {
    /// Raw file
    pub source: PathBuf,
    /// Written store
    pub output: PathBuf,
    /// Fields written and field-local failures
    pub fields: BatchReport,
    /// Extra stores reported by the parser
    pub auxiliary: Vec<PathBuf>,
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: {}",
            self.source.display(),
            self.output.display(),
            self.fields
        )
    }
}

/// Outcome of converting one file
#[derive(Debug)]
pub enum FileOutcome {
    /// The store was written
    Converted(FileReport),
    /// The output already existed and `overwrite` was off
    AlreadyConverted {
        /// Raw file
        source: PathBuf,
        /// Existing store
        output: PathBuf,
    },
    /// The file could not be converted; its partial store is left in place
    Failed {
        /// Raw file
        source: PathBuf,
        /// Why
        error: ConvertError,
    },
}

impl FileOutcome {
    /// The raw file this outcome is about
    pub fn source(&self) -> &Path {
        match self {
            FileOutcome::Converted(report) => &report.source,
            FileOutcome::AlreadyConverted { source, .. } | FileOutcome::Failed { source, .. } => source,
        }
    }

    /// The usable output store, if any
    pub fn output(&self) -> Option<&Path> {
        match self {
            FileOutcome::Converted(report) => Some(&report.output),
            FileOutcome::AlreadyConverted { output, .. } => Some(output),
            FileOutcome::Failed { .. } => None,
        }
    }

    /// Returns true if the file failed
    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

/// Result of a conversion run
#[derive(Debug)]
pub struct ConversionReport {
    /// One outcome per source, in source order
    pub files: Vec<FileOutcome>,
    /// Combine outcome, when combining was requested
    pub combine: Option<CombineOutcome>,
}

impl ConversionReport {
    /// Number of failed files
    pub fn failed_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_failed()).count()
    }

    /// Usable output stores, in source order
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter_map(|f| f.output().map(Path::to_path_buf))
            .collect()
    }
}

/// Converts raw files with one parser
pub struct Converter<P> {
    parser: P,
    sources: Vec<PathBuf>,
    params: ConversionParams,
    config: ConvertConfig,
}

impl<P: DatagramParser> Converter<P> {
    /// Converter for `sources` with default parameters
    pub fn new<S: AsRef<Path>>(parser: P, sources: &[S]) -> Self {
        Self {
            parser,
            sources: sources.iter().map(|s| s.as_ref().to_path_buf()).collect(),
            params: ConversionParams::default(),
            config: ConvertConfig::default(),
        }
    }

    /// Set the user metadata
    pub fn with_params(mut self, params: ConversionParams) -> Self {
        self.params = params;
        self
    }

    /// Set the configuration
    pub fn with_config(mut self, config: ConvertConfig) -> Self {
        self.config = config;
        self
    }

    /// Raw files to convert
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Output store of each source
    ///
    /// `save_path` is a directory (created when missing), or, for a single
    /// source, the output store itself. Without it, outputs go next to the
    /// first source.
    pub fn output_paths(&self, save_path: Option<&Path>) -> Result<Vec<PathBuf>, ConvertError> {
        let first = self.sources.first().ok_or(ConvertError::NoSources)?;
        let out_dir = match save_path {
            None => first.parent().map(Path::to_path_buf).unwrap_or_default(),
            Some(path) if path.extension().is_none() => path.to_path_buf(),
            Some(path) if self.sources.len() == 1 => return Ok(vec![path.to_path_buf()]),
            Some(path) => {
                return Err(ConvertError::InvalidSavePath(format!(
                    "{} must be a directory when converting {} files",
                    path.display(),
                    self.sources.len()
                )))
            }
        };

        self.sources
            .iter()
            .map(|source| {
                let stem = source.file_stem().ok_or_else(|| {
                    ConvertError::InvalidSavePath(format!("no file name in {}", source.display()))
                })?;
                Ok(out_dir.join(format!("{}.{STORE_EXTENSION}", stem.to_string_lossy())))
            })
            .collect()
    }

    /// Convert every source, then combine the outputs when configured
    pub fn convert(&self, save_path: Option<&Path>) -> Result<ConversionReport, ConvertError> {
        let outputs = self.output_paths(save_path)?;
        for output in &outputs {
            if let Some(dir) = output.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)?;
                }
            }
        }

        let jobs: Vec<(&PathBuf, &PathBuf)> = self.sources.iter().zip(&outputs).collect();
        let files: Vec<FileOutcome> = if self.config.parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()?;
            pool.install(|| {
                jobs.par_iter()
                    .map(|(source, output)| self.convert_one(source, output))
                    .collect()
            })
        } else {
            jobs.iter()
                .map(|(source, output)| self.convert_one(source, output))
                .collect()
        };

        let combine = match &self.config.combine {
            Some(config) => Some(self.combine(&files, save_path, config)?),
            None => None,
        };

        Ok(ConversionReport { files, combine })
    }

    fn combine(
        &self,
        files: &[FileOutcome],
        save_path: Option<&Path>,
        config: &CombineConfig,
    ) -> Result<CombineOutcome, ConvertError> {
        let failed = files.iter().filter(|f| f.is_failed()).count();
        if failed > 0 {
            let reason = SkipReason::FailedConversions { failed };
            warn!("Combination did not occur: {reason}");
            return Ok(CombineOutcome::Skipped(reason));
        }

        let outputs: Vec<&Path> = files.iter().filter_map(FileOutcome::output).collect();
        let auxiliary: Vec<&PathBuf> = files
            .iter()
            .filter_map(|f| match f {
                FileOutcome::Converted(report) => Some(&report.auxiliary),
                _ => None,
            })
            .flatten()
            .collect();

        let destination = save_path.filter(|p| p.extension().is_none());
        let outcome = StoreCombiner::new(self.parser.sonar_model())
            .with_auxiliary(&auxiliary)
            .with_config(config.clone())
            .combine(&outputs, destination)?;
        Ok(outcome)
    }

    fn convert_one(&self, source: &Path, output: &Path) -> FileOutcome {
        if output.exists() {
            if !self.config.overwrite {
                let error = match Store::open(output) {
                    Ok(store) if store.is_finalized() => {
                        info!(
                            "{} has already been converted to {}, skipping",
                            source.display(),
                            output.display()
                        );
                        return FileOutcome::AlreadyConverted {
                            source: source.to_path_buf(),
                            output: output.to_path_buf(),
                        };
                    }
                    Ok(_) => ConvertError::PartialStore(output.to_path_buf()),
                    Err(e) => e.into(),
                };
                warn!("Cannot reuse {}: {}", output.display(), error);
                return FileOutcome::Failed {
                    source: source.to_path_buf(),
                    error,
                };
            }
            info!("Overwriting {}", output.display());
            if let Err(e) = remove_store(output) {
                return FileOutcome::Failed {
                    source: source.to_path_buf(),
                    error: e.into(),
                };
            }
        }

        match self.convert_file(source, output) {
            Ok(report) => {
                info!("{report}");
                FileOutcome::Converted(report)
            }
            Err(error) => {
                warn!("Failed to convert {}: {}", source.display(), error);
                FileOutcome::Failed {
                    source: source.to_path_buf(),
                    error,
                }
            }
        }
    }

    fn convert_file(&self, source: &Path, output: &Path) -> Result<FileReport, ConvertError> {
        info!("Converting {} to {}", source.display(), output.display());
        let parsed = self
            .parser
            .parse(source, output)
            .map_err(|e| ConvertError::Parse {
                path: source.to_path_buf(),
                source: e,
            })?;

        let store = Store::create_with_config(output, self.config.store.clone())?;
        for (path, attributes) in self.group_attributes(source, &parsed) {
            let mut group = store.require_group(&path)?;
            group.set_attributes(attributes)?;
        }
        for payload in &parsed.groups {
            let group = store.require_group(&payload.path)?;
            for array in &payload.arrays {
                group.create_array(&array.name, array.spec.clone(), &array.data, &array.shape)?;
            }
        }

        let mut fields = write_batches(&store, &parsed.batches, &self.config.writer);
        if let Some(failure) = fields.take_fatal_error() {
            return Err(failure.error.into());
        }
        for failure in &fields.failed {
            warn!(
                "{}: skipped {}/{:?}: {}",
                source.display(),
                failure.group,
                failure.fields,
                failure.error
            );
        }

        store.finalize()?;
        Ok(FileReport {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            fields,
            auxiliary: parsed.auxiliary_outputs,
        })
    }

    /// Attributes of every group written before the field batches
    ///
    /// User parameters override what the parser reports.
    fn group_attributes(&self, source: &Path, parsed: &ParsedFile) -> BTreeMap<String, Attributes> {
        let mut groups: BTreeMap<String, Attributes> = BTreeMap::new();
        for payload in &parsed.groups {
            groups
                .entry(payload.path.trim_matches('/').to_string())
                .or_default()
                .extend(payload.attributes.clone());
        }

        let root = groups.entry(String::new()).or_default();
        root.extend(self.params.root_attributes());
        root.insert(
            SONAR_MODEL_ATTRIBUTE.to_string(),
            Value::from(self.parser.sonar_model().as_str()),
        );

        groups
            .entry(PROVENANCE_GROUP.to_string())
            .or_default()
            .extend(provenance(source));

        let platform = self.params.platform_attributes();
        if !platform.is_empty() {
            groups.entry(PLATFORM_GROUP.to_string()).or_default().extend(platform);
        }
        groups
    }
}

fn provenance(source: &Path) -> Attributes {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut attributes = Attributes::new();
    attributes.insert(
        "conversion_software_name".to_string(),
        Value::from(env!("CARGO_PKG_NAME")),
    );
    attributes.insert(
        "conversion_software_version".to_string(),
        Value::from(env!("CARGO_PKG_VERSION")),
    );
    attributes.insert(
        "conversion_time".to_string(),
        Value::from(chrono::Utc::now().to_rfc3339()),
    );
    attributes.insert("source_filenames".to_string(), Value::from(vec![file_name]));
    attributes
}
