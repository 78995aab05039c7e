//! Persisted description of a stored archive
//!
//! The metadata travels next to the archive in two encodings: a JSON sidecar
//! document and a flat string map for object-store metadata headers. Both carry
//! the digest of the uncompressed tar stream, which restore compares against.

use crate::key::CacheKey;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use depot_archive::{CacheArtifact, CompressionAlgorithm, Digest, HashAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current metadata layout version
pub const FORMAT_VERSION: u32 = 1;

const HEADER_PREFIX: &str = "depot-";

/// Metadata stored with each archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Layout version, see [`FORMAT_VERSION`]
    pub format_version: u32,
    /// Entry the archive belongs to
    pub key: CacheKey,
    /// Digest of the uncompressed tar stream
    pub digest: Digest,
    /// Algorithm of `digest`
    pub hash_algorithm: HashAlgorithm,
    /// Codec of the stored archive
    pub compression: CompressionAlgorithm,
    /// Compressed size in bytes
    pub archive_size: u64,
    /// Uncompressed tar size in bytes
    pub tar_size: u64,
    /// When the archive was packaged
    pub created_at: DateTime<Utc>,
}

impl ArtifactMetadata {
    /// Describe a freshly packaged artifact
    #[must_use]
    pub fn from_artifact(key: CacheKey, artifact: &CacheArtifact) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            key,
            digest: artifact.digest.clone(),
            hash_algorithm: artifact.digest.algorithm(),
            compression: artifact.compression,
            archive_size: artifact.archive_size,
            tar_size: artifact.tar_size,
            created_at: Utc::now(),
        }
    }

    /// Check version and internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::configuration(format!(
                "unsupported metadata format version {} (expected {FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.digest.algorithm() != self.hash_algorithm {
            return Err(Error::configuration(format!(
                "digest {} does not match hash algorithm {}",
                self.digest, self.hash_algorithm
            )));
        }
        Ok(())
    }

    /// Encode as a pretty JSON document
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Decode and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let meta: Self =
            serde_json::from_str(json).map_err(|e| Error::serialization(e.to_string()))?;
        meta.validate()?;
        Ok(meta)
    }

    /// Encode as flat `depot-*` headers
    #[must_use]
    pub fn to_headers(&self) -> BTreeMap<String, String> {
        let fields = [
            ("format-version", self.format_version.to_string()),
            ("project", self.key.project.clone()),
            ("branch", self.key.branch.clone()),
            ("digest", self.digest.to_string()),
            ("hash-algorithm", self.hash_algorithm.to_string()),
            ("compression", self.compression.to_string()),
            ("archive-size", self.archive_size.to_string()),
            ("tar-size", self.tar_size.to_string()),
            ("created-at", self.created_at.to_rfc3339()),
        ];
        fields
            .into_iter()
            .map(|(name, value)| (format!("{HEADER_PREFIX}{name}"), value))
            .collect()
    }

    /// Decode and validate `depot-*` headers; header names are case-insensitive
    pub fn from_headers(headers: &BTreeMap<String, String>) -> Result<Self> {
        let lookup: BTreeMap<String, &str> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .collect();
        let field = |name: &str| header(&lookup, name);
        let number = |name: &str| -> Result<u64> {
            field(name)?
                .parse()
                .map_err(|e| Error::serialization(format!("header {HEADER_PREFIX}{name}: {e}")))
        };

        let format_version = u32::try_from(number("format-version")?)
            .map_err(|e| Error::serialization(format!("header format-version: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(field("created-at")?)
            .map_err(|e| Error::serialization(format!("header created-at: {e}")))?
            .with_timezone(&Utc);

        let meta = Self {
            format_version,
            key: CacheKey::new(field("project")?, field("branch")?)?,
            digest: field("digest")?.parse()?,
            hash_algorithm: field("hash-algorithm")?.parse()?,
            compression: field("compression")?.parse()?,
            archive_size: number("archive-size")?,
            tar_size: number("tar-size")?,
            created_at,
        };
        meta.validate()?;
        Ok(meta)
    }
}

fn header<'a>(lookup: &BTreeMap<String, &'a str>, name: &str) -> Result<&'a str> {
    lookup
        .get(&format!("{HEADER_PREFIX}{name}"))
        .copied()
        .ok_or_else(|| Error::serialization(format!("missing header {HEADER_PREFIX}{name}")))
}
