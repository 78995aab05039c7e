//! Branch-keyed build caches for depot
//!
//! This crate provides everything around the archive pipeline in
//! `depot-archive`:
//! - `depot.toml` configuration with environment overrides
//! - Project/branch cache keys and object names
//! - Archive metadata carrying the content digest
//! - A narrow object-store interface with a local filesystem backend
//! - Save/restore orchestration with fallback branches and verification
//!
//! # Overview
//!
//! A save packages the configured paths into a staging file, compares its digest
//! with the stored entry and uploads only when the content changed. A restore
//! tries the branch and then each fallback branch, extracts the first entry it
//! finds and checks the digest of the extracted tar stream against the stored
//! one.

// TODO(cache-docs): Add # Errors documentation to all fallible public functions
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod config;
pub mod depot;
mod error;
pub mod key;
pub mod logging;
pub mod metadata;
pub mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use config::{DepotConfig, VerifyMode};
pub use depot::{Depot, RestoreOutcome, SaveOutcome};
pub use key::CacheKey;
pub use metadata::ArtifactMetadata;
pub use store::{LocalObjectStore, ObjectStore};
