//! Archive reader: compressed stream → decompress → (hash ‖ extract)
//!
//! Extraction consumes entries from a [`HashingReader`] wrapped around the
//! decoder. Skipped entries are still read through the hasher, and the stream
//! is drained after the last entry, so the digest always covers the complete
//! tar stream regardless of the overwrite policy.

use crate::compression::CompressionAlgorithm;
use crate::hash::{Digest, HashAlgorithm};
use crate::tee::HashingReader;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument, trace, warn};

/// What to do when a regular file from the archive already exists on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverwritePolicy {
    /// Replace the existing file
    Overwrite,
    /// Keep the existing file without telling anyone
    SkipSilently,
    /// Keep the existing file and emit a warning
    #[default]
    SkipWithWarning,
    /// Abort the restore with [`Error::RestoreConflict`]
    Fail,
}

impl OverwritePolicy {
    /// Stable kebab-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::SkipSilently => "skip-silently",
            Self::SkipWithWarning => "skip-with-warning",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverwritePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "skip-silently" | "skip" => Ok(Self::SkipSilently),
            "skip-with-warning" | "warn" => Ok(Self::SkipWithWarning),
            "fail" | "error" => Ok(Self::Fail),
            other => Err(Error::configuration(format!(
                "unknown overwrite policy: {other}"
            ))),
        }
    }
}

/// Restore options
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Codec the archive was written with
    pub compression: CompressionAlgorithm,
    /// Algorithm for the restore-side digest
    pub hash: HashAlgorithm,
    /// Conflict handling for regular files
    pub overwrite: OverwritePolicy,
    /// Directory entry names are joined under, `/` to restore in place
    pub destination: PathBuf,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            compression: CompressionAlgorithm::default(),
            hash: HashAlgorithm::default(),
            overwrite: OverwritePolicy::default(),
            destination: PathBuf::from("/"),
        }
    }
}

/// Outcome of a restore
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// Digest of the full uncompressed tar stream
    pub digest: Digest,
    /// Size of the uncompressed tar stream
    pub tar_size: u64,
    /// Entries seen in the archive
    pub entries: u64,
    /// Regular files written to disk
    pub files_written: u64,
    /// Directories created or confirmed
    pub directories: u64,
    /// Existing files that were left untouched
    pub skipped: Vec<PathBuf>,
    /// Warnings emitted for skipped files
    pub warnings: usize,
}

impl RestoreReport {
    /// Compare the restore-side digest with the one recorded at save time
    pub fn verify(&self, expected: &Digest) -> Result<()> {
        if &self.digest == expected {
            Ok(())
        } else {
            Err(Error::digest_mismatch(expected, &self.digest))
        }
    }
}

/// Extract a compressed archive stream under `options.destination`.
///
/// Directory entries are created recursively. Regular files that already exist
/// are handled by the overwrite policy; every other entry kind goes through the
/// default extraction.
#[instrument(skip_all, fields(
    compression = %options.compression,
    overwrite = %options.overwrite,
    destination = %options.destination.display()
))]
pub fn restore_archive<R: Read>(source: R, options: &RestoreOptions) -> Result<RestoreReport> {
    let destination = options.destination.as_path();
    std::fs::create_dir_all(destination)
        .map_err(|e| Error::io(e, destination, "create_dir_all"))?;

    let decoder = options.compression.decoder(source)?;
    let mut tee = HashingReader::new(decoder, options.hash.hasher());

    let mut entries = 0u64;
    let mut files_written = 0u64;
    let mut directories = 0u64;
    let mut skipped = Vec::new();
    let mut warnings = 0usize;
    let mut pending_dirs = Vec::new();

    {
        let mut archive = tar::Archive::new(&mut tee);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.set_overwrite(true);

        let iter = archive
            .entries()
            .map_err(|e| Error::io_no_path(e, "read archive"))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| Error::io_no_path(e, "read archive entry"))?;
            entries += 1;

            let name = entry
                .path()
                .map_err(|e| Error::io_no_path(e, "decode entry name"))?
                .into_owned();
            let target = destination.join(confined(&name)?);
            let kind = entry.header().entry_type();

            if kind.is_dir() {
                std::fs::create_dir_all(&target)
                    .map_err(|e| Error::io(e, &target, "create_dir_all"))?;
                let header = entry.header();
                let mode = header
                    .mode()
                    .map_err(|e| Error::io(e, &target, "read directory mode"))?;
                let mtime = header
                    .mtime()
                    .map_err(|e| Error::io(e, &target, "read directory mtime"))?;
                pending_dirs.push((target, mode, mtime));
                directories += 1;
                continue;
            }

            if kind.is_file() && target.symlink_metadata().is_ok() {
                match options.overwrite {
                    OverwritePolicy::Overwrite => {
                        debug!(path = %target.display(), "Overwriting existing file");
                    }
                    OverwritePolicy::SkipSilently => {
                        skipped.push(target);
                        continue;
                    }
                    OverwritePolicy::SkipWithWarning => {
                        warn!(path = %target.display(), "File already exists, skipping");
                        warnings += 1;
                        skipped.push(target);
                        continue;
                    }
                    OverwritePolicy::Fail => return Err(Error::restore_conflict(target)),
                }
            }

            let unpacked = entry
                .unpack_in(destination)
                .map_err(|e| Error::io(e, &target, "unpack"))?;
            if !unpacked {
                return Err(Error::UnsafeEntry { path: name });
            }
            if kind.is_file() {
                files_written += 1;
            }
            trace!(path = %target.display(), "Unpacked entry");
        }
    }

    // Children first, so a read-only parent is finalized after its contents and
    // writing them does not bump its mtime again
    for (dir, mode, mtime) in pending_dirs.iter().rev() {
        apply_dir_metadata(dir, *mode, *mtime)?;
        trace!(path = %dir.display(), mode = format_args!("{mode:o}"), "Directory");
    }

    // Trailing zero blocks and padding belong to the hashed stream too
    tee.drain()
        .map_err(|e| Error::io_no_path(e, "drain archive"))?;
    let (digest, tar_size) = tee.finish();

    info!(
        entries,
        files_written,
        skipped = skipped.len(),
        tar_size,
        digest = %digest,
        "Restored archive"
    );

    Ok(RestoreReport {
        digest,
        tar_size,
        entries,
        files_written,
        directories,
        skipped,
        warnings,
    })
}

fn apply_dir_metadata(dir: &Path, mode: u32, mtime: u64) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| Error::io(e, dir, "set directory mode"))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mtime = i64::try_from(mtime).unwrap_or(i64::MAX);
    filetime::set_file_mtime(dir, filetime::FileTime::from_unix_time(mtime, 0))
        .map_err(|e| Error::io(e, dir, "set directory mtime"))
}

/// Relative form of an entry name, rejecting names that climb out of the root
fn confined(name: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(Error::UnsafeEntry {
                    path: name.to_path_buf(),
                });
            }
        }
    }
    Ok(out)
}
