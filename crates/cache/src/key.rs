//! Cache keys and object names
//!
//! An entry is identified by project and branch. Both are slugged to a safe
//! character set for use as store paths, and each slug carries an 8-byte
//! SHA-256 prefix of the raw name so that `feature/x` and `feature_x` (or
//! projects `my app` and `my_app`) never share an entry.

use crate::{Error, Result};
use depot_archive::{CompressionAlgorithm, Digest};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Base name of the archive object inside an entry
const OBJECT_STEM: &str = "cache";

/// Identity of one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Project identity
    pub project: String,
    /// Branch identity
    pub branch: String,
}

impl CacheKey {
    /// Build a key, rejecting empty components
    pub fn new(project: impl Into<String>, branch: impl Into<String>) -> Result<Self> {
        let project = project.into();
        let branch = branch.into();
        if project.trim().is_empty() {
            return Err(Error::configuration("project must not be empty"));
        }
        if branch.trim().is_empty() {
            return Err(Error::configuration("branch must not be empty"));
        }
        Ok(Self { project, branch })
    }

    /// Same project, different branch
    pub fn with_branch(&self, branch: impl Into<String>) -> Result<Self> {
        Self::new(self.project.clone(), branch)
    }

    /// Store-relative directory of the entry:
    /// `<project-slug>-<hash8>/<branch-slug>-<hash8>`
    #[must_use]
    pub fn prefix(&self) -> String {
        format!(
            "{}-{}/{}-{}",
            slug(&self.project),
            name_hash(&self.project),
            slug(&self.branch),
            name_hash(&self.branch)
        )
    }

    /// Full object name of an archive: `<prefix>/cache-<hex>.<ext>`.
    ///
    /// The archive is named after its content digest, so a metadata sidecar
    /// can only ever point at the bytes it describes.
    #[must_use]
    pub fn object_name(&self, digest: &Digest, compression: CompressionAlgorithm) -> String {
        format!(
            "{}/{OBJECT_STEM}-{}.{}",
            self.prefix(),
            digest.as_hex(),
            compression.extension()
        )
    }

    /// This key followed by one key per fallback branch, duplicates removed
    pub fn candidates<I, S>(&self, fallbacks: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = vec![self.clone()];
        for branch in fallbacks {
            let key = self.with_branch(branch)?;
            if !out.contains(&key) {
                out.push(key);
            }
        }
        Ok(out)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.branch)
    }
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`
fn slug(value: &str) -> String {
    let slug: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // "." and ".." would be path navigation, not names
    if slug.chars().all(|c| c == '.') {
        slug.replace('.', "_")
    } else {
        slug
    }
}

fn name_hash(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(&digest[..8])
}
