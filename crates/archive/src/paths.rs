//! Path normalization for the set of cached paths
//!
//! Inputs arrive as a mix of absolute paths and paths relative to a project
//! root. They are merged, missing entries are dropped with a warning, and the
//! survivors are canonicalized and reduced so that no kept path is nested in
//! another one.

use crate::{Error, Result};
use std::cmp::Ordering;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Ordered, non-overlapping set of absolute paths to package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSet {
    paths: Vec<PathBuf>,
}

impl PathSet {
    /// Merge absolute and root-relative inputs, drop missing paths and normalize.
    ///
    /// Every missing path produces one warning and is reported in `missing`.
    /// An empty result is [`Error::NothingToCache`].
    pub fn resolve<A, R>(paths: A, relative: R, project_root: &Path) -> Result<Resolved>
    where
        A: IntoIterator,
        A::Item: AsRef<Path>,
        R: IntoIterator,
        R::Item: AsRef<Path>,
    {
        let merged = paths
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .chain(relative.into_iter().map(|p| project_root.join(p)));

        let mut present = Vec::new();
        let mut missing = Vec::new();
        for path in merged {
            // symlink_metadata so a dangling link is still cached as a link
            if path.symlink_metadata().is_ok() {
                present.push(path);
            } else {
                warn!(path = %path.display(), "Path does not exist, skipping");
                missing.push(path);
            }
        }

        let set = Self::from_existing(present)?;
        Ok(Resolved { set, missing })
    }

    /// Normalize paths that are known to exist.
    pub fn from_existing<I>(paths: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<Path>,
    {
        let paths = normalize(paths);
        if paths.is_empty() {
            return Err(Error::NothingToCache);
        }
        debug!(count = paths.len(), "Resolved path set");
        Ok(Self { paths })
    }

    /// Paths in archive order
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of top-level paths
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Always false for a constructed set, kept for API symmetry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// Result of [`PathSet::resolve`]
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Normalized paths that exist
    pub set: PathSet,
    /// Inputs that were skipped because they do not exist
    pub missing: Vec<PathBuf>,
}

/// Reduce a path list to a minimal sorted set with no nested entries.
///
/// Existing paths are canonicalized (symlinks resolved); paths that cannot be
/// canonicalized are made absolute and cleaned lexically.
#[must_use]
pub fn normalize<I>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    let mut segmented: Vec<Vec<OsString>> = paths
        .into_iter()
        .map(|p| segments(&canonical_form(p.as_ref())))
        .collect();
    segmented.sort_by(|a, b| compare_segments(a, b));

    let mut kept: Vec<Vec<OsString>> = Vec::with_capacity(segmented.len());
    for candidate in segmented {
        // Sorted order puts an ancestor right before its descendants, so only the
        // last kept entry can cover the candidate
        let covered = kept
            .last()
            .is_some_and(|last| is_segment_prefix(last, &candidate));
        if !covered {
            kept.push(candidate);
        }
    }

    kept.iter().map(|segs| join_segments(segs)).collect()
}

/// True if `ancestor` is `path` or one of its ancestors, compared by segment
#[must_use]
pub fn is_ancestor_or_self(ancestor: &Path, path: &Path) -> bool {
    is_segment_prefix(&segments(ancestor), &segments(path))
}

fn canonical_form(path: &Path) -> PathBuf {
    if let Ok(canonical) = canonicalize_plain(path) {
        return canonical;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    lexical_clean(&absolute)
}

#[cfg(windows)]
fn canonicalize_plain(path: &Path) -> std::io::Result<PathBuf> {
    // Strip the verbatim prefix so canonical paths compare with user input
    let canonical = std::fs::canonicalize(path)?;
    let text = canonical.to_string_lossy();
    Ok(text
        .strip_prefix(r"\\?\")
        .map_or_else(|| canonical.clone(), PathBuf::from))
}

#[cfg(not(windows))]
fn canonicalize_plain(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Split into segments; the root (and prefix on Windows) is the first segment
fn segments(path: &Path) -> Vec<OsString> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_os_string())
        .collect()
}

fn join_segments(segments: &[OsString]) -> PathBuf {
    segments.iter().collect()
}

/// Platforms whose default filesystems compare names case-insensitively
const CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

fn segment_key(segment: &OsString) -> String {
    let text = segment.to_string_lossy();
    if CASE_INSENSITIVE {
        text.to_lowercase()
    } else {
        text.into_owned()
    }
}

fn compare_segments(a: &[OsString], b: &[OsString]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match segment_key(x).cmp(&segment_key(y)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn is_segment_prefix(prefix: &[OsString], path: &[OsString]) -> bool {
    prefix.len() <= path.len()
        && prefix
            .iter()
            .zip(path)
            .all(|(a, b)| segment_key(a) == segment_key(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[cfg(unix)]
    #[test]
    fn test_nested_paths_collapse_to_ancestor() {
        let out = normalize([p("/a/b"), p("/a"), p("/a/b/c")]);
        assert_eq!(out, vec![p("/a")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_siblings_with_shared_name_prefix_are_kept() {
        // "/a/bc" is not inside "/a/b" even though the strings share a prefix
        let out = normalize([p("/a/bc"), p("/a/b")]);
        assert_eq!(out, vec![p("/a/b"), p("/a/bc")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_duplicates_and_dot_segments_are_removed() {
        let out = normalize([p("/x/./y"), p("/x/y"), p("/x/z/../y/")]);
        assert_eq!(out, vec![p("/x/y")]);
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let out = normalize(Vec::<PathBuf>::new());
        assert!(out.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize([p("/r/b"), p("/r/a/x"), p("/r/a"), p("/q")]);
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_relative_paths_resolve_against_cwd() {
        let out = normalize([p("some/relative/dir")]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_absolute());
    }

    #[test]
    fn test_symlinked_duplicates_are_merged() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real");
        std::fs::create_dir_all(real.join("inner")).unwrap();
        #[cfg(unix)]
        {
            let link = temp.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();
            let out = normalize([link.join("inner"), real.clone()]);
            assert_eq!(out, vec![std::fs::canonicalize(&real).unwrap()]);
        }
    }

    #[test]
    fn test_resolve_skips_missing_and_merges_relative() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();

        let resolved = PathSet::resolve(
            [root.join("target/debug"), root.join("does-not-exist")],
            ["target", "node_modules", "also-missing"],
            root,
        )
        .unwrap();

        let canonical_root = std::fs::canonicalize(root).unwrap();
        assert_eq!(
            resolved.set.paths(),
            &[
                canonical_root.join("node_modules"),
                canonical_root.join("target")
            ]
        );
        assert_eq!(resolved.missing.len(), 2);
    }

    #[test]
    fn test_resolve_with_only_missing_paths_is_nothing_to_cache() {
        let temp = TempDir::new().unwrap();
        let result = PathSet::resolve(
            [temp.path().join("gone")],
            Vec::<PathBuf>::new(),
            temp.path(),
        );
        assert!(matches!(result, Err(Error::NothingToCache)));
    }

    #[test]
    fn test_empty_inputs_are_nothing_to_cache() {
        let result = PathSet::from_existing(Vec::<PathBuf>::new());
        assert!(matches!(result, Err(Error::NothingToCache)));
    }

    #[cfg(unix)]
    #[test]
    fn test_ancestor_check_is_segment_based() {
        assert!(is_ancestor_or_self(Path::new("/a"), Path::new("/a/b")));
        assert!(is_ancestor_or_self(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!is_ancestor_or_self(Path::new("/a/b"), Path::new("/a/bc")));
    }
}
