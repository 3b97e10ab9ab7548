//! # Hierarchical Chunked Array Store
//!
//! A store is a local directory tree of named groups. Each group carries
//! attributes and holds arrays; each array is chunked along its first
//! (time) axis, one Parquet file per chunk.
//!
//! ```text
//! {name}.zarr/
//! ├── group.json                # root group attributes
//! ├── consolidated.json         # every node's metadata, written by finalize()
//! ├── Beam/
//! │   ├── group.json
//! │   ├── ping_time/array.json + c/0.parquet
//! │   └── backscatter_r/
//! │       ├── array.json        # shape, chunks, dimensions, dtype, fill value
//! │       └── c/{k}.parquet     # rows [k * chunks[0], (k + 1) * chunks[0])
//! └── Platform/NMEA/...
//! ```
//!
//! Every metadata and chunk file is written to a temporary file, synced,
//! and renamed into place. A store is mutable until [`Store::finalize`]
//! consolidates its metadata; from then on it opens read-only.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use echostore::store::{ArrayData, ArraySpec, DataType, Store};
//!
//! let store = Store::create("out.zarr")?;
//! let beam = store.create_group("Beam")?;
//! let spec = ArraySpec::new(DataType::Float64, &["ping_time", "range_sample"], 2);
//! let mut array = beam.create_array("depth", spec, &ArrayData::Float64(vec![0.0; 4]), &[2, 2])?;
//! array.append(&ArrayData::Float64(vec![1.0; 2]), &[1, 2])?;
//! let store = store.finalize()?;
//! assert_eq!(store.group("Beam")?.array("depth")?.shape(), &[3, 2]);
//! # Ok::<(), echostore::store::StoreError>(())
//! ```

mod array;
mod chunk;
mod config;
mod data;
mod error;
mod group;
mod metadata;


use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

pub use array::{ArrayHandle, ArraySpec};
pub use config::{CompressionType, StoreConfig, VALUES_COLUMN};
pub use data::{ArrayData, Complex64};
pub use error::StoreError;
pub use group::Group;
pub use metadata::{
    ArrayMetadata, Attributes, ConsolidatedMetadata, DataType, FillValue, GroupMetadata,
    NodeMetadata, ARRAY_METADATA_FILE, CONSOLIDATED_METADATA_FILE, GROUP_METADATA_FILE,
    STORE_FORMAT_VERSION,
};

use metadata::{read_json, write_json_atomic};

/// A hierarchical chunked array store rooted at a local directory
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    config: StoreConfig,
    consolidated: Option<Arc<ConsolidatedMetadata>>,
}

impl Store {
    /// Create a new, empty store with default encoding options
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::create_with_config(path, StoreConfig::default())
    }

    /// Create a new, empty store
    ///
    /// Fails with [`StoreError::AlreadyExists`] if anything exists at `path`.
    pub fn create_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        if root.exists() {
            return Err(StoreError::AlreadyExists(root.display().to_string()));
        }
        fs::create_dir_all(&root)?;
        write_json_atomic(
            &root.join(GROUP_METADATA_FILE),
            &GroupMetadata::new(Attributes::new()),
        )?;
        debug!("Created store {}", root.display());
        Ok(Self {
            root,
            config,
            consolidated: None,
        })
    }

    /// Open an existing store with default encoding options
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open an existing store
    ///
    /// A finalized store is opened read-only from its consolidated metadata.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        if !root.join(GROUP_METADATA_FILE).exists() {
            return Err(StoreError::NotFound(format!("store {}", root.display())));
        }
        let consolidated_file = root.join(CONSOLIDATED_METADATA_FILE);
        let consolidated = if consolidated_file.exists() {
            Some(Arc::new(read_json::<ConsolidatedMetadata>(&consolidated_file)?))
        } else {
            None
        };
        Ok(Self {
            root,
            config,
            consolidated,
        })
    }

    /// Root directory of the store
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Encoding options used for new chunks
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns true once [`Store::finalize`] has run
    pub fn is_finalized(&self) -> bool {
        self.consolidated.is_some()
    }

    /// The root group
    pub fn root_group(&self) -> Result<Group, StoreError> {
        self.group("")
    }

    /// Open the group at `path` (`""` is the root, `/` separates levels)
    pub fn group(&self, path: &str) -> Result<Group, StoreError> {
        let path = normalize(path);
        let dir = self.node_dir(&path);
        let metadata = match &self.consolidated {
            Some(consolidated) => match consolidated.nodes.get(&path) {
                Some(NodeMetadata::Group(metadata)) => metadata.clone(),
                _ => return Err(StoreError::NotFound(format!("group '{path}'"))),
            },
            None => {
                let file = dir.join(GROUP_METADATA_FILE);
                if !file.exists() {
                    return Err(StoreError::NotFound(format!("group '{path}'")));
                }
                read_json(&file)?
            }
        };
        Ok(Group::new(
            dir,
            path,
            metadata,
            self.config.clone(),
            self.consolidated.clone(),
        ))
    }

    /// Returns true if a group exists at `path`
    pub fn has_group(&self, path: &str) -> bool {
        let path = normalize(path);
        match &self.consolidated {
            Some(consolidated) => {
                matches!(consolidated.nodes.get(&path), Some(NodeMetadata::Group(_)))
            }
            None => self.node_dir(&path).join(GROUP_METADATA_FILE).exists(),
        }
    }

    /// Create a group at `path`, creating missing parent groups
    pub fn create_group(&self, path: &str) -> Result<Group, StoreError> {
        self.ensure_writable()?;
        let path = normalize(path);
        if self.has_group(&path) {
            return Err(StoreError::AlreadyExists(format!("group '{path}'")));
        }
        let mut current = String::new();
        for part in path.split('/') {
            validate_name(part)?;
            current = join_path(&current, part);
            let dir = self.node_dir(&current);
            if !dir.join(GROUP_METADATA_FILE).exists() {
                fs::create_dir_all(&dir)?;
                write_json_atomic(
                    &dir.join(GROUP_METADATA_FILE),
                    &GroupMetadata::new(Attributes::new()),
                )?;
            }
        }
        self.group(&path)
    }

    /// Open the group at `path`, creating it if missing
    pub fn require_group(&self, path: &str) -> Result<Group, StoreError> {
        if self.has_group(path) {
            self.group(path)
        } else {
            self.create_group(path)
        }
    }

    /// Copy a group's metadata file and arrays (not its subgroups) from another store
    ///
    /// The destination group is created when missing; its `group.json` is
    /// replaced by a byte copy of the source's.
    pub fn copy_group_shallow(&self, source: &Group) -> Result<Group, StoreError> {
        self.ensure_writable()?;
        let dest = self.require_group(source.path())?;
        fs::copy(
            source.dir().join(GROUP_METADATA_FILE),
            dest.dir().join(GROUP_METADATA_FILE),
        )?;
        for name in source.array_names()? {
            dest.copy_array_from(&source.array(&name)?)?;
        }
        self.group(source.path())
    }

    /// Consolidate the metadata of every node and make the store read-only
    pub fn finalize(self) -> Result<Store, StoreError> {
        self.ensure_writable()?;
        let mut nodes = std::collections::BTreeMap::new();
        collect_nodes(&self.root, String::new(), &mut nodes)?;
        let node_count = nodes.len();
        let consolidated = ConsolidatedMetadata {
            format_version: STORE_FORMAT_VERSION,
            nodes,
        };
        write_json_atomic(&self.root.join(CONSOLIDATED_METADATA_FILE), &consolidated)?;
        debug!(
            "Finalized store {} ({} nodes)",
            self.root.display(),
            node_count
        );
        Ok(Self {
            root: self.root,
            config: self.config,
            consolidated: Some(Arc::new(consolidated)),
        })
    }

    fn node_dir(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.is_finalized() {
            return Err(StoreError::ReadOnly(self.root.display().to_string()));
        }
        Ok(())
    }
}

fn collect_nodes(
    dir: &Path,
    path: String,
    nodes: &mut std::collections::BTreeMap<String, NodeMetadata>,
) -> Result<(), StoreError> {
    let group: GroupMetadata = read_json(&dir.join(GROUP_METADATA_FILE))?;
    nodes.insert(path.clone(), NodeMetadata::Group(group));

    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let child = entry.path();
        let child_path = join_path(&path, &name);
        if child.join(ARRAY_METADATA_FILE).exists() {
            let array: ArrayMetadata = read_json(&child.join(ARRAY_METADATA_FILE))?;
            nodes.insert(child_path, NodeMetadata::Array(array));
        } else if child.join(GROUP_METADATA_FILE).exists() {
            collect_nodes(&child, child_path, nodes)?;
        }
    }
    Ok(())
}

/// Delete a store directory and everything in it
pub fn remove_store<P: AsRef<Path>>(path: P) -> Result<(), StoreError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(StoreError::NotFound(format!("store {}", path.display())));
    }
    fs::remove_dir_all(path)?;
    Ok(())
}

/// Recursively copy a directory
pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(StoreError::InvalidFormat(format!("invalid node name '{name}'")));
    }
    Ok(())
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}
