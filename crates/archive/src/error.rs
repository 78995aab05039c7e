//! Error types for the archive crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for packaging and restore operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading sources, writing the archive or extracting
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(depot::archive::io),
        help("Check file permissions and available disk space")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "unpack")
        operation: String,
    },

    /// Malformed input handed to the pipeline
    #[error("Archive configuration error: {message}")]
    #[diagnostic(code(depot::archive::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Every requested path was missing or the path list was empty
    #[error("Nothing to cache: none of the requested paths exist")]
    #[diagnostic(
        code(depot::archive::nothing_to_cache),
        help("Check the configured paths; missing paths are skipped with a warning")
    )]
    NothingToCache,

    /// A restored file already exists and the overwrite policy is `fail`
    #[error("Restore conflict: {} already exists", path.display())]
    #[diagnostic(
        code(depot::archive::restore_conflict),
        help("Remove the file or choose a different overwrite policy")
    )]
    RestoreConflict {
        /// Target path that already exists
        path: PathBuf,
    },

    /// Digest computed while restoring differs from the recorded one
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(depot::archive::digest_mismatch),
        help("The stored archive may be corrupt or was written by a different producer")
    )]
    DigestMismatch {
        /// Digest recorded at save time
        expected: String,
        /// Digest computed over the restored tar stream
        actual: String,
    },

    /// Archive entry would be written outside of the restore root
    #[error("Refusing to unpack entry outside of the restore root: {}", path.display())]
    #[diagnostic(code(depot::archive::unsafe_entry))]
    UnsafeEntry {
        /// Entry path as recorded in the archive
        path: PathBuf,
    },

    /// Digest string could not be parsed
    #[error("Invalid digest: {value}")]
    #[diagnostic(
        code(depot::archive::invalid_digest),
        help("Digests are written as <algorithm>:<hex>, e.g. sha256:ab12...")
    )]
    InvalidDigest {
        /// The rejected input
        value: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a restore conflict error
    #[must_use]
    pub fn restore_conflict(path: impl Into<PathBuf>) -> Self {
        Self::RestoreConflict { path: path.into() }
    }

    /// Create a digest mismatch error
    #[must_use]
    pub fn digest_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, Error>;
