//! Dataset scoping and deterministic artifact names.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the time-series collection inside every dataset namespace
pub const TIMESERIES_COLLECTION: &str = "image_timeseries";

const NAMESPACE_PREFIX: &str = "ros_images_";

/// PostgreSQL truncates identifiers longer than this many bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

/// Longest suffix whose namespace still fits in one identifier
pub const MAX_SUFFIX_BYTES: usize = MAX_IDENTIFIER_BYTES - NAMESPACE_PREFIX.len();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuffixError {
    #[error("Dataset suffix is empty")]
    Empty,

    #[error("Dataset suffix '{suffix}' contains '{ch}', only [A-Za-z0-9_-] is allowed")]
    InvalidChar { suffix: String, ch: char },

    #[error("Dataset suffix '{suffix}' is {len} bytes, at most {} allowed", MAX_SUFFIX_BYTES)]
    TooLong { suffix: String, len: usize },
}

/// Storage identity of one dataset.
///
/// Every artifact a batch writes (mirror directory, blob namespace,
/// time-series collection) embeds the suffix verbatim. Suffixes are limited
/// to characters that are safe in all three, so two datasets with different
/// suffixes never share storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetScope {
    suffix: String,
}

impl DatasetScope {
    pub fn new(suffix: impl Into<String>) -> Result<Self, SuffixError> {
        let suffix = suffix.into();

        if suffix.is_empty() {
            return Err(SuffixError::Empty);
        }
        if let Some(ch) = suffix.chars().find(|c| !is_safe_char(*c)) {
            return Err(SuffixError::InvalidChar { suffix, ch });
        }
        if suffix.len() > MAX_SUFFIX_BYTES {
            let len = suffix.len();
            return Err(SuffixError::TooLong { suffix, len });
        }

        Ok(Self { suffix })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Blob namespace and database schema: `ros_images_{suffix}`
    pub fn namespace(&self) -> String {
        format!("{}{}", NAMESPACE_PREFIX, self.suffix)
    }

    /// Local mirror directory: `{base}/extracted_images_{suffix}`
    pub fn local_dir(&self, base: &Path) -> PathBuf {
        base.join(format!("extracted_images_{}", self.suffix))
    }

    /// `{suffix}_frame_{index:05}.png`
    ///
    /// Indices past 99999 simply widen, so names stay unique per suffix.
    pub fn artifact_name(&self, index: u64) -> String {
        format!("{}_frame_{:05}.png", self.suffix, index)
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Sanitize a path component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn scope(suffix: &str) -> DatasetScope {
        DatasetScope::new(suffix).unwrap()
    }

    #[test]
    fn test_artifact_name_padding() {
        assert_eq!(scope("D").artifact_name(0), "D_frame_00000.png");
        assert_eq!(scope("D").artifact_name(42), "D_frame_00042.png");
        assert_eq!(scope("H").artifact_name(99_999), "H_frame_99999.png");
        assert_eq!(scope("H").artifact_name(123_456), "H_frame_123456.png");
    }

    #[test]
    fn test_artifact_names_are_injective() {
        let scope = scope("D");
        let names: HashSet<String> = (0..120_000).map(|i| scope.artifact_name(i)).collect();
        assert_eq!(names.len(), 120_000);
    }

    #[test]
    fn test_scope_paths() {
        let scope = scope("D");
        assert_eq!(scope.namespace(), "ros_images_D");
        assert_eq!(
            scope.local_dir(Path::new("/data")),
            PathBuf::from("/data/extracted_images_D")
        );
        assert_eq!(scope.artifact_name(7), "D_frame_00007.png");
    }

    #[test]
    fn test_suffix_is_used_verbatim() {
        let dashed = scope("run-2_b");
        assert_eq!(dashed.namespace(), "ros_images_run-2_b");
        assert_eq!(dashed.artifact_name(1), "run-2_b_frame_00001.png");
    }

    #[test]
    fn test_rejects_unsafe_suffixes() {
        assert_eq!(DatasetScope::new(""), Err(SuffixError::Empty));
        assert!(matches!(
            DatasetScope::new("../etc"),
            Err(SuffixError::InvalidChar { ch: '.', .. })
        ));
        assert!(matches!(
            DatasetScope::new("D.1"),
            Err(SuffixError::InvalidChar { ch: '.', .. })
        ));
        assert!(matches!(
            DatasetScope::new("x\"; DROP"),
            Err(SuffixError::InvalidChar { ch: '"', .. })
        ));
        assert!(matches!(
            DatasetScope::new("caméra"),
            Err(SuffixError::InvalidChar { ch: 'é', .. })
        ));
    }

    #[test]
    fn test_namespace_fits_postgres_identifier() {
        let longest = "a".repeat(MAX_SUFFIX_BYTES);
        assert_eq!(scope(&longest).namespace().len(), 63);

        let too_long = "a".repeat(MAX_SUFFIX_BYTES + 1);
        assert!(matches!(
            DatasetScope::new(too_long),
            Err(SuffixError::TooLong { len: 53, .. })
        ));
    }

    #[test]
    fn test_distinct_suffixes_never_share_storage() {
        let suffixes = ["D_1", "D-1", "d_1", "D1"];
        let namespaces: HashSet<String> = suffixes.iter().map(|s| scope(s).namespace()).collect();
        let dirs: HashSet<PathBuf> = suffixes
            .iter()
            .map(|s| scope(s).local_dir(Path::new("out")))
            .collect();

        assert_eq!(namespaces.len(), suffixes.len());
        assert_eq!(dirs.len(), suffixes.len());
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("glasses-001"), "glasses-001");
        assert_eq!(sanitize_path_component("device/path"), "device_path");
        assert_eq!(sanitize_path_component("dev..ice"), "dev__ice");
        assert_eq!(sanitize_path_component("hello world"), "hello_world");
    }
}
