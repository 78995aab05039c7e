//! Streaming archive pipeline for depot build caches
//!
//! This crate packages a set of filesystem paths into a compressed tar archive
//! and restores it again, hashing the uncompressed tar stream on both sides:
//! - Path normalization: merge, canonicalize and de-nest the cached paths
//! - Archive writer: tar → (hash ‖ compress) → staging file
//! - Archive reader: decompress → (hash ‖ extract) with an overwrite policy
//! - Staging files: scoped temp files tagged with their compression
//!
//! # Overview
//!
//! Both pipelines are single-pass and streaming. The digest is computed over the
//! uncompressed tar bytes, so an archive written with one codec and restored
//! with another still produces the same digest.

// TODO(archive-docs): Add # Errors documentation to all fallible public functions
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod compression;
mod error;
pub mod hash;
pub mod paths;
pub mod reader;
pub mod tee;
pub mod temp;
pub mod writer;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use compression::CompressionAlgorithm;
pub use hash::{Digest, HashAlgorithm};
pub use paths::{PathSet, Resolved, normalize};
pub use reader::{OverwritePolicy, RestoreOptions, RestoreReport, restore_archive};
pub use temp::TempArchive;
pub use writer::{CacheArtifact, WriteOptions, archive_name, write_archive};
