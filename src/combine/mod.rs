//! # Store Combine Engine
//!
//! Merges N independently converted stores of one instrument into a single
//! store, one group at a time, with a merge strategy per group taken from a
//! [`PolicyTable`]:
//!
//! | Group | EK60 | EK80 | AZFP |
//! |---|---|---|---|
//! | top-level, Provenance, Sonar | copy-first | copy-first | copy-first |
//! | Beam | concat (by coords) | concat (by coords) | concat (by coords) |
//! | Environment | copy-first | copy-first | concat (by coords) |
//! | Platform | concat (by coords) | concat (by coords) | copy-first |
//! | Vendor | | | concat (by coords) |
//! | Platform/NMEA | concat (nested) | concat (nested) | |
//! | Vendor filter coefficients | | copy-binary-block | |
//!
//! Combining is a reported no-op when there are fewer than two sources or
//! the sources disagree on key parameters. EK80 files are split by a
//! [`SplitPredicate`] into two outputs (broadband and continuous-wave).
//!
//! ## Example
//!
//! ```rust,no_run
//! use echostore::combine::{CombineOutcome, SonarModel, StoreCombiner};
//!
//! let combiner = StoreCombiner::new(SonarModel::Ek60);
//! let sources = ["D1.zarr", "D2.zarr", "D3.zarr"];
//! match combiner.combine(&sources, None)? {
//!     CombineOutcome::Combined(report) => println!("{report}"),
//!     CombineOutcome::Skipped(reason) => println!("not combined: {reason}"),
//! }
//! # Ok::<(), echostore::combine::CombineError>(())
//! ```

mod engine;
mod error;
mod naming;
mod policy;
mod split;

#[cfg(test)]
mod tests;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde_json::Value;

use crate::record::CHANNEL_DIM;
use crate::store::{remove_store, Group, Store, StoreConfig, StoreError};

pub use engine::{is_time_dim, FilterCoefficientBlock, MergeCounts};
pub use error::CombineError;
pub use naming::{combined_path, with_stem_suffix, COMBINED_MARKER};
pub use policy::{ConcatOrder, GroupSlot, MergeStrategy, PolicyTable, SonarModel};
pub use split::{FilenameMarker, SplitPredicate};

/// Root attribute naming the instrument a store was converted from
pub const SONAR_MODEL_ATTRIBUTE: &str = "sonar_model";

/// Options of a combine run
#[derive(Debug, Clone)]
pub struct CombineConfig {
    /// Delete sources and auxiliary stores after a successful combine
    pub remove_sources: bool,

    /// Replace an existing destination instead of failing
    pub overwrite: bool,

    /// Attributes (root or `Sonar`) that must agree across sources
    pub key_attributes: Vec<String>,

    /// Encoding options of the combined store
    pub store: StoreConfig,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            remove_sources: false,
            overwrite: false,
            key_attributes: vec![SONAR_MODEL_ATTRIBUTE.to_string()],
            store: StoreConfig::default(),
        }
    }
}

/// Why a combine did not happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than two sources were given
    InsufficientSources {
        /// Number of sources given
        found: usize,
    },
    /// Sources disagree on a key parameter
    ConsistencyCheckFailed(String),
    /// Some inputs failed to convert, so there is nothing complete to combine
    FailedConversions {
        /// Number of failed conversions
        failed: usize,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientSources { found } => {
                write!(f, "only {found} source file(s), at least 2 are needed")
            }
            SkipReason::ConsistencyCheckFailed(reason) => {
                write!(f, "inconsistent parameters: {reason}")
            }
            SkipReason::FailedConversions { failed } => {
                write!(f, "{failed} file(s) failed to convert")
            }
        }
    }
}

/// One written combined store
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedOutput {
    /// Location of the combined store
    pub path: PathBuf,
    /// Stores merged into it, in input order
    pub sources: Vec<PathBuf>,
    /// Groups written, with the strategy used, in write order
    pub groups: Vec<(String, MergeStrategy)>,
    /// Array totals over all groups
    pub counts: MergeCounts,
}

impl fmt::Display for CombinedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Combined {} stores into {} ({} groups, {} arrays concatenated, {} copied)",
            self.sources.len(),
            self.path.display(),
            self.groups.len(),
            self.counts.concatenated,
            self.counts.copied
        )
    }
}

/// Result of best-effort source deletion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionReport {
    /// Paths removed
    pub removed: Vec<PathBuf>,
    /// Paths that could not be removed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl DeletionReport {
    /// Returns true if nothing failed to delete
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The removed paths, or [`CombineError::PartialDeletionFailure`]
    pub fn into_result(self) -> Result<Vec<PathBuf>, CombineError> {
        if self.failed.is_empty() {
            Ok(self.removed)
        } else {
            Err(CombineError::PartialDeletionFailure {
                failed: self.failed.into_iter().map(|(path, _)| path).collect(),
            })
        }
    }
}

/// Everything a successful combine produced
#[derive(Debug, Clone, PartialEq)]
pub struct CombineReport {
    /// Written stores (two for a split)
    pub outputs: Vec<CombinedOutput>,
    /// Labels of split sub-groups that had no stores
    pub empty_subgroups: Vec<String>,
    /// Source deletion, when requested
    pub deletion: DeletionReport,
}

impl fmt::Display for CombineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, output) in self.outputs.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{output}")?;
        }
        Ok(())
    }
}

/// Outcome of [`StoreCombiner::combine`]
#[derive(Debug, Clone, PartialEq)]
pub enum CombineOutcome {
    /// Stores were written
    Combined(CombineReport),
    /// Nothing was written or deleted
    Skipped(SkipReason),
}

impl CombineOutcome {
    /// Returns true if stores were written
    pub fn is_combined(&self) -> bool {
        matches!(self, CombineOutcome::Combined(_))
    }
}

/// Combines converted stores of one instrument model
#[derive(Debug, Clone)]
pub struct StoreCombiner {
    model: SonarModel,
    policy: PolicyTable,
    split: Option<Arc<dyn SplitPredicate>>,
    auxiliary: Vec<PathBuf>,
    config: CombineConfig,
}

impl StoreCombiner {
    /// Combiner with the default policy and split for `model`
    pub fn new(model: SonarModel) -> Self {
        let split: Option<Arc<dyn SplitPredicate>> = match model {
            SonarModel::Ek80 => Some(Arc::new(FilenameMarker::continuous_wave())),
            SonarModel::Ek60 | SonarModel::Azfp => None,
        };
        Self {
            model,
            policy: PolicyTable::default(),
            split,
            auxiliary: Vec::new(),
            config: CombineConfig::default(),
        }
    }

    /// Replace the policy table
    pub fn with_policy(mut self, policy: PolicyTable) -> Self {
        self.policy = policy;
        self
    }

    /// Replace (or remove, with `None`) the split predicate
    pub fn with_split(mut self, split: Option<Arc<dyn SplitPredicate>>) -> Self {
        self.split = split;
        self
    }

    /// Extra stores produced alongside the sources, merged and deleted with them
    pub fn with_auxiliary<P: AsRef<Path>>(mut self, paths: &[P]) -> Self {
        self.auxiliary = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    /// Replace the combine options
    pub fn with_config(mut self, config: CombineConfig) -> Self {
        self.config = config;
        self
    }

    /// The instrument model
    pub fn model(&self) -> SonarModel {
        self.model
    }

    /// Combine `sources` into one store (two when split)
    ///
    /// `destination` follows [`combined_path`]. On error, every store
    /// written by this call is removed and no source is deleted.
    pub fn combine<P: AsRef<Path>>(
        &self,
        sources: &[P],
        destination: Option<&Path>,
    ) -> Result<CombineOutcome, CombineError> {
        let sources: Vec<PathBuf> = sources.iter().map(|p| p.as_ref().to_path_buf()).collect();
        if sources.len() < 2 {
            let reason = SkipReason::InsufficientSources {
                found: sources.len(),
            };
            warn!("Combination did not occur: {reason}");
            return Ok(CombineOutcome::Skipped(reason));
        }

        let destination = combined_path(&sources[0], destination)?;
        let mut all = sources.clone();
        all.extend(self.auxiliary.iter().cloned());

        // (label, output path, members)
        let mut subgroups: Vec<(String, PathBuf, Vec<PathBuf>)> = match &self.split {
            Some(split) => {
                let (primary, secondary) = split::partition(split.as_ref(), all.clone());
                vec![
                    ("primary".to_string(), destination.clone(), primary),
                    (
                        split.suffix().to_string(),
                        with_stem_suffix(&destination, split.suffix()),
                        secondary,
                    ),
                ]
            }
            None => vec![("all".to_string(), destination.clone(), all.clone())],
        };

        let mut empty_subgroups = Vec::new();
        subgroups.retain(|(label, _, members)| {
            if members.is_empty() {
                info!("No stores in sub-group '{label}'; skipping its output");
                empty_subgroups.push(label.clone());
            }
            !members.is_empty()
        });

        // Every sub-group must pass before anything is written
        let mut opened = Vec::with_capacity(subgroups.len());
        for (label, path, members) in subgroups {
            let stores = open_all(&members)?;
            if let Some(reason) = self.check_consistency(&members, &stores)? {
                let reason = SkipReason::ConsistencyCheckFailed(format!("{label}: {reason}"));
                warn!("Combination did not occur: {reason}");
                return Ok(CombineOutcome::Skipped(reason));
            }
            opened.push((path, members, stores));
        }

        let mut outputs = Vec::with_capacity(opened.len());
        for (path, members, stores) in opened {
            match self.write_output(&path, &stores) {
                Ok((groups, counts)) => {
                    let output = CombinedOutput {
                        path,
                        sources: members,
                        groups,
                        counts,
                    };
                    info!("{output}");
                    outputs.push(output);
                }
                Err(e) => {
                    discard(&path);
                    for output in &outputs {
                        discard(&output.path);
                    }
                    return Err(e);
                }
            }
        }

        let deletion = if self.config.remove_sources {
            let written: Vec<&Path> = outputs.iter().map(|o| o.path.as_path()).collect();
            delete_sources(all.iter().filter(|p| !written.contains(&p.as_path())))
        } else {
            DeletionReport::default()
        };

        Ok(CombineOutcome::Combined(CombineReport {
            outputs,
            empty_subgroups,
            deletion,
        }))
    }

    /// Why the stores cannot be combined, or `None` if they can
    fn check_consistency(
        &self,
        paths: &[PathBuf],
        stores: &[Store],
    ) -> Result<Option<String>, CombineError> {
        let mut roots = Vec::with_capacity(stores.len());
        for store in stores {
            roots.push(store.root_group()?);
        }

        for (path, root) in paths.iter().zip(&roots) {
            let model = root.attribute(SONAR_MODEL_ATTRIBUTE).and_then(Value::as_str);
            if model != Some(self.model.as_str()) {
                return Ok(Some(format!(
                    "{} has sonar_model {:?}, expected {}",
                    path.display(),
                    model,
                    self.model
                )));
            }
        }

        for key in &self.config.key_attributes {
            let mut values = Vec::with_capacity(stores.len());
            for (store, root) in stores.iter().zip(&roots) {
                values.push(key_attribute(store, root, key)?);
            }
            if values.windows(2).any(|w| w[0] != w[1]) {
                return Ok(Some(format!("attribute '{key}' differs between sources")));
            }
        }

        let channels = stores
            .par_iter()
            .map(beam_channels)
            .collect::<Result<Vec<_>, StoreError>>()?;
        if channels.windows(2).any(|w| w[0] != w[1]) {
            return Ok(Some("Beam channels differ between sources".to_string()));
        }

        Ok(None)
    }

    fn write_output(
        &self,
        path: &Path,
        stores: &[Store],
    ) -> Result<(Vec<(String, MergeStrategy)>, MergeCounts), CombineError> {
        if path.exists() {
            if !self.config.overwrite {
                return Err(CombineError::AlreadyExists(path.to_path_buf()));
            }
            remove_store(path)?;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        info!("Combining {} stores into {}", stores.len(), path.display());
        let dest = Store::create_with_config(path, self.config.store.clone())?;
        let mut groups = Vec::new();
        let mut counts = MergeCounts::default();

        for (slot, strategy) in self.policy.plan(self.model) {
            let group_path = slot.path();
            let present = stores.iter().filter(|s| s.has_group(group_path)).count();
            if present == 0 {
                debug!("No source has group {slot}; skipping");
                continue;
            }
            if present < stores.len() {
                return Err(StoreError::NotFound(format!(
                    "group '{group_path}' is missing from {} of {} sources",
                    stores.len() - present,
                    stores.len()
                ))
                .into());
            }

            let sources = stores
                .iter()
                .map(|s| s.group(group_path))
                .collect::<Result<Vec<Group>, StoreError>>()?;
            let merged = match strategy {
                MergeStrategy::CopyFirst => engine::copy_first(&dest, &sources[0])?,
                MergeStrategy::ConcatTime(order) => engine::concat_time(&dest, &sources, order)?,
                MergeStrategy::CopyBinaryBlock => engine::copy_binary_block(&dest, &sources[0])?,
            };
            debug!("Wrote group {slot} ({strategy})");
            counts.add(merged);
            groups.push((slot.to_string(), strategy));
        }

        dest.finalize()?;
        Ok((groups, counts))
    }
}

fn open_all(paths: &[PathBuf]) -> Result<Vec<Store>, CombineError> {
    let stores = paths
        .par_iter()
        .map(Store::open)
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(stores)
}

/// Value of a key attribute, looked up on the root group, then on `Sonar`
fn key_attribute(store: &Store, root: &Group, key: &str) -> Result<Option<Value>, StoreError> {
    if let Some(value) = root.attribute(key) {
        return Ok(Some(value.clone()));
    }
    if store.has_group("Sonar") {
        return Ok(store.group("Sonar")?.attribute(key).cloned());
    }
    Ok(None)
}

fn beam_channels(store: &Store) -> Result<Option<crate::store::ArrayData>, StoreError> {
    if !store.has_group("Beam") {
        return Ok(None);
    }
    let beam = store.group("Beam")?;
    if !beam.has_array(CHANNEL_DIM) {
        return Ok(None);
    }
    Ok(Some(beam.array(CHANNEL_DIM)?.read()?))
}

fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}

fn delete_sources<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> DeletionReport {
    let mut report = DeletionReport::default();
    for path in paths {
        match remove_store(path) {
            Ok(()) => report.removed.push(path.clone()),
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                report.failed.push((path.clone(), e.to_string()));
            }
        }
    }
    report
}
