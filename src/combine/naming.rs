use std::path::{Path, PathBuf};

use crate::store::GROUP_METADATA_FILE;

use super::CombineError;

/// Marker appended to the first source's stem in default output names
pub const COMBINED_MARKER: &str = "[combined]";

/// Resolve where a combined store is written
///
/// - `None`: next to the first source, as `<stem>[combined].<ext>`
/// - an existing directory that is not a store, or a path without an
///   extension: inside that directory, as `<stem>[combined].<ext>`
/// - anything else: that exact path
pub fn combined_path(first_source: &Path, destination: Option<&Path>) -> Result<PathBuf, CombineError> {
    let file_name = combined_file_name(first_source)?;
    let path = match destination {
        None => first_source.with_file_name(file_name),
        Some(dest) if is_save_dir(dest) => dest.join(file_name),
        Some(dest) => dest.to_path_buf(),
    };
    Ok(path)
}

fn is_save_dir(path: &Path) -> bool {
    if path.is_dir() {
        return !path.join(GROUP_METADATA_FILE).exists();
    }
    !path.exists() && path.extension().is_none()
}

fn combined_file_name(source: &Path) -> Result<String, CombineError> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            CombineError::InvalidDestination(format!("no file name in {}", source.display()))
        })?;
    Ok(match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}{COMBINED_MARKER}.{ext}"),
        None => format!("{stem}{COMBINED_MARKER}"),
    })
}

/// `path` with `suffix` appended to its file stem
pub fn with_stem_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}
