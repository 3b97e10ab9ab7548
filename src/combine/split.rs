use std::path::{Path, PathBuf};

/// Decides which sub-group of a combine a store belongs to
///
/// Stores the predicate matches are combined into a secondary output whose
/// name carries [`SplitPredicate::suffix`].
pub trait SplitPredicate: Send + Sync + std::fmt::Debug {
    /// Returns true if `path` belongs to the secondary sub-group
    fn is_secondary(&self, path: &Path) -> bool;

    /// Suffix appended to the file stem of the secondary output
    fn suffix(&self) -> &str;
}

/// Matches stores whose file name contains a marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameMarker {
    marker: String,
}

impl FilenameMarker {
    /// Match file names containing `marker`; the marker is also the output suffix
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// EK80 continuous-wave files, converted with `_cw` in their name
    pub fn continuous_wave() -> Self {
        Self::new("_cw")
    }
}

impl SplitPredicate for FilenameMarker {
    fn is_secondary(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.contains(&self.marker))
            .unwrap_or(false)
    }

    fn suffix(&self) -> &str {
        &self.marker
    }
}

/// Partition paths into (primary, secondary), preserving order
pub(crate) fn partition(
    predicate: &dyn SplitPredicate,
    paths: impl IntoIterator<Item = PathBuf>,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    paths.into_iter().partition(|p| !predicate.is_secondary(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_matches_file_name_only() {
        let marker = FilenameMarker::continuous_wave();
        assert!(marker.is_secondary(Path::new("/data/D20200101-T000000_cw.zarr")));
        assert!(!marker.is_secondary(Path::new("/data_cw/D20200101-T000000.zarr")));
    }

    #[test]
    fn test_partition_preserves_order() {
        let marker = FilenameMarker::continuous_wave();
        let paths = vec![
            PathBuf::from("b_cw.zarr"),
            PathBuf::from("a.zarr"),
            PathBuf::from("c.zarr"),
            PathBuf::from("a_cw.zarr"),
        ];
        let (primary, secondary) = partition(&marker, paths);
        assert_eq!(primary, vec![PathBuf::from("a.zarr"), PathBuf::from("c.zarr")]);
        assert_eq!(
            secondary,
            vec![PathBuf::from("b_cw.zarr"), PathBuf::from("a_cw.zarr")]
        );
    }
}
