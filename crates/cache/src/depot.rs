//! Save and restore orchestration
//!
//! [`Depot`] ties the configuration, the archive pipeline and an
//! [`ObjectStore`] together:
//!
//! - **save**: resolve paths → package into a staging file → skip the upload
//!   when the stored digest is identical → upload archive and metadata
//! - **restore**: look up the branch, then each fallback → download into a
//!   staging file → extract → compare digests

use crate::config::{DepotConfig, VerifyMode};
use crate::key::CacheKey;
use crate::metadata::ArtifactMetadata;
use crate::store::{LocalObjectStore, ObjectStore};
use crate::{Error, Result};
use depot_archive::{CacheArtifact, RestoreReport, TempArchive, restore_archive, write_archive};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Result of [`Depot::save`]
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    /// A new archive was stored
    Uploaded {
        /// Metadata of the stored archive
        metadata: ArtifactMetadata,
        /// Configured paths that did not exist
        missing: Vec<PathBuf>,
    },
    /// The stored archive already has the same digest
    Unchanged {
        /// Metadata of the existing entry
        metadata: ArtifactMetadata,
        /// Configured paths that did not exist
        missing: Vec<PathBuf>,
    },
}

impl SaveOutcome {
    /// Metadata of the entry now in the store
    #[must_use]
    pub fn metadata(&self) -> &ArtifactMetadata {
        match self {
            Self::Uploaded { metadata, .. } | Self::Unchanged { metadata, .. } => metadata,
        }
    }
}

/// Result of [`Depot::restore`]
#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    /// An entry was found and extracted
    Restored {
        /// Key the entry was found under (may be a fallback branch)
        key: CacheKey,
        /// Metadata of the restored entry
        metadata: ArtifactMetadata,
        /// Extraction details
        report: RestoreReport,
        /// Whether the restored digest matched the stored one
        verified: bool,
    },
    /// No candidate key had an entry
    Miss,
}

impl RestoreOutcome {
    /// True for [`RestoreOutcome::Restored`]
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Restored { .. })
    }
}

/// Cache front end over an object store
#[derive(Debug)]
pub struct Depot<S = LocalObjectStore> {
    config: DepotConfig,
    store: S,
}

impl Depot<LocalObjectStore> {
    /// Depot backed by the local store directory from `config`
    pub fn from_config(config: DepotConfig) -> Result<Self> {
        let store = LocalObjectStore::new(config.store_dir()?);
        Self::new(config, store)
    }
}

impl<S: ObjectStore> Depot<S> {
    /// Depot over an explicit store
    pub fn new(config: DepotConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Package the configured paths and store them under the configured key
    #[instrument(skip(self), fields(project = %self.config.project))]
    pub fn save(&self) -> Result<SaveOutcome> {
        let key = self.config.cache_key()?;
        let resolved = self.config.resolve_paths()?;

        let temp = TempArchive::new_in(self.config.temp_dir(), self.config.compression)?;
        let artifact = write_archive(&resolved.set, &self.config.write_options(), temp)?;

        if let Some(existing) = self.head(&key)?
            && existing.digest == artifact.digest
        {
            info!(key = %key, digest = %artifact.digest, "Cache entry unchanged, skipping upload");
            return Ok(SaveOutcome::Unchanged {
                metadata: existing,
                missing: resolved.missing,
            });
        }

        let metadata = ArtifactMetadata::from_artifact(key.clone(), &artifact);
        let CacheArtifact { mut file, .. } = artifact;
        self.store.put(&key, &mut file, &metadata)?;

        info!(
            key = %key,
            digest = %metadata.digest,
            archive_size = metadata.archive_size,
            "Saved cache entry"
        );
        Ok(SaveOutcome::Uploaded {
            metadata,
            missing: resolved.missing,
        })
    }

    /// Restore the first entry found for the branch or its fallbacks
    #[instrument(skip(self), fields(project = %self.config.project))]
    pub fn restore(&self) -> Result<RestoreOutcome> {
        for key in self.config.restore_candidates()? {
            let Some(head) = self.head(&key)? else {
                debug!(key = %key, "No entry");
                continue;
            };

            let mut temp = TempArchive::new_in(self.config.temp_dir(), head.compression)?;
            let metadata = self.store.get(&key, temp.file_mut())?;
            if metadata.key != key {
                warn!(key = %key, stored = %metadata.key, "Entry replaced by another key, skipping");
                continue;
            }
            temp.rewind()?;

            let options = self
                .config
                .restore_options(metadata.compression, metadata.hash_algorithm);
            let report = restore_archive(&mut temp, &options)?;

            let verified = match report.verify(&metadata.digest) {
                Ok(()) => true,
                Err(_) if self.config.verify == VerifyMode::Warn => {
                    warn!(
                        key = %key,
                        expected = %metadata.digest,
                        actual = %report.digest,
                        "Restored content does not match stored digest"
                    );
                    false
                }
                Err(_) => {
                    return Err(Error::Verification {
                        key: key.object_name(&metadata.digest, metadata.compression),
                        expected: metadata.digest.to_string(),
                        actual: report.digest.to_string(),
                    });
                }
            };

            info!(
                key = %key,
                entries = report.entries,
                skipped = report.skipped.len(),
                verified,
                "Restored cache entry"
            );
            return Ok(RestoreOutcome::Restored {
                key,
                metadata,
                report,
                verified,
            });
        }

        info!("Cache miss");
        Ok(RestoreOutcome::Miss)
    }

    /// Metadata stored under `key`, treating an entry recorded for a different
    /// key as absent
    fn head(&self, key: &CacheKey) -> Result<Option<ArtifactMetadata>> {
        match self.store.head(key)? {
            Some(metadata) if metadata.key != *key => {
                warn!(key = %key, stored = %metadata.key, "Entry belongs to another key, ignoring");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Remove the entry for the configured key
    pub fn delete(&self) -> Result<bool> {
        let key = self.config.cache_key()?;
        self.store.delete(&key)
    }
}
