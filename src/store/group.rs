use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use super::array::{ArrayHandle, ArraySpec};
use super::config::StoreConfig;
use super::data::ArrayData;
use super::error::StoreError;
use super::metadata::{
    write_json_atomic, Attributes, ConsolidatedMetadata, GroupMetadata, NodeMetadata,
    ARRAY_METADATA_FILE, GROUP_METADATA_FILE,
};
use super::{copy_dir_all, join_path, validate_name};

/// Handle to one group of a store
#[derive(Debug, Clone)]
pub struct Group {
    dir: PathBuf,
    path: String,
    metadata: GroupMetadata,
    config: StoreConfig,
    consolidated: Option<Arc<ConsolidatedMetadata>>,
}

impl Group {
    pub(crate) fn new(
        dir: PathBuf,
        path: String,
        metadata: GroupMetadata,
        config: StoreConfig,
        consolidated: Option<Arc<ConsolidatedMetadata>>,
    ) -> Self {
        Self {
            dir,
            path,
            metadata,
            config,
            consolidated,
        }
    }

    /// Node path inside the store (`""` for the root group)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Directory holding this group
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Returns true if the owning store is finalized
    pub fn is_read_only(&self) -> bool {
        self.consolidated.is_some()
    }

    /// Group attributes
    pub fn attributes(&self) -> &Attributes {
        &self.metadata.attributes
    }

    /// Look up one attribute
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.metadata.attributes.get(key)
    }

    /// Replace all attributes
    pub fn set_attributes(&mut self, attributes: Attributes) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.metadata.attributes = attributes;
        self.persist()
    }

    /// Insert or overwrite one attribute
    pub fn insert_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.metadata.attributes.insert(key.into(), value.into());
        self.persist()
    }

    /// Names of the arrays in this group, sorted
    pub fn array_names(&self) -> Result<Vec<String>, StoreError> {
        self.child_names(ARRAY_METADATA_FILE, |node| matches!(node, NodeMetadata::Array(_)))
    }

    /// Names of the direct subgroups of this group, sorted
    pub fn subgroup_names(&self) -> Result<Vec<String>, StoreError> {
        self.child_names(GROUP_METADATA_FILE, |node| matches!(node, NodeMetadata::Group(_)))
    }

    fn child_names(
        &self,
        marker: &str,
        matches_kind: impl Fn(&NodeMetadata) -> bool,
    ) -> Result<Vec<String>, StoreError> {
        if let Some(consolidated) = &self.consolidated {
            return Ok(consolidated
                .children(&self.path)
                .filter(|(_, node)| matches_kind(node))
                .map(|(name, _)| name.to_string())
                .collect());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.path().join(marker).exists() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns true if this group holds an array called `name`
    pub fn has_array(&self, name: &str) -> bool {
        let path = join_path(&self.path, name);
        match &self.consolidated {
            Some(consolidated) => matches!(consolidated.nodes.get(&path), Some(NodeMetadata::Array(_))),
            None => self.dir.join(name).join(ARRAY_METADATA_FILE).exists(),
        }
    }

    /// Open the array called `name`
    pub fn array(&self, name: &str) -> Result<ArrayHandle, StoreError> {
        let path = join_path(&self.path, name);
        let metadata = match &self.consolidated {
            Some(consolidated) => match consolidated.nodes.get(&path) {
                Some(NodeMetadata::Array(metadata)) => Some(metadata.clone()),
                _ => return Err(StoreError::NotFound(format!("array '{path}'"))),
            },
            None => None,
        };
        ArrayHandle::open(
            self.dir.join(name),
            path,
            metadata,
            self.config.clone(),
            !self.is_read_only(),
        )
    }

    /// Create a new array holding `initial` (of `initial_shape`) as its first rows
    pub fn create_array(
        &self,
        name: &str,
        spec: ArraySpec,
        initial: &ArrayData,
        initial_shape: &[u64],
    ) -> Result<ArrayHandle, StoreError> {
        self.ensure_writable()?;
        validate_name(name)?;
        ArrayHandle::create(
            self.dir.join(name),
            join_path(&self.path, name),
            spec,
            initial,
            initial_shape,
            self.config.clone(),
        )
    }

    /// Copy an array from another store byte for byte
    pub fn copy_array_from(&self, source: &ArrayHandle) -> Result<ArrayHandle, StoreError> {
        self.ensure_writable()?;
        let name = source.name().to_string();
        let dest = self.dir.join(&name);
        let path = join_path(&self.path, &name);
        if dest.exists() {
            return Err(StoreError::AlreadyExists(path));
        }
        copy_dir_all(source.dir(), &dest)?;
        ArrayHandle::open(dest, path, None, self.config.clone(), true)
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly(format!("group '{}'", self.path)));
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.dir.join(GROUP_METADATA_FILE), &self.metadata)
    }
}
