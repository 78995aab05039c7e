//! Archive writer: path set → tar → (hash ‖ compress) → staging file
//!
//! The tar builder writes into a [`HashingWriter`] that forwards each chunk to
//! the compression encoder, which writes into the staging file. Source files are
//! streamed entry by entry; the archive is never held in memory.

use crate::compression::CompressionAlgorithm;
use crate::hash::{Digest, HashAlgorithm};
use crate::paths::PathSet;
use crate::tee::HashingWriter;
use crate::temp::TempArchive;
use crate::{Error, Result};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tar::HeaderMode;
use tracing::{info, instrument, trace, warn};
use walkdir::WalkDir;

/// Buffer between the encoder and the staging file
const WRITE_BUFFER: usize = 256 * 1024;

/// Packaging options
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Codec for the tar stream
    pub compression: CompressionAlgorithm,
    /// Codec level, `None` for the codec default
    pub compression_level: Option<i32>,
    /// Digest algorithm over the uncompressed tar stream
    pub hash: HashAlgorithm,
    /// Zero out mtimes and ownership so identical trees produce identical bytes
    pub deterministic: bool,
}

/// A packaged archive ready for upload
#[derive(Debug)]
pub struct CacheArtifact {
    /// Staging file, rewound to the start
    pub file: TempArchive,
    /// Compressed size on disk
    pub archive_size: u64,
    /// Size of the uncompressed tar stream that was hashed
    pub tar_size: u64,
    /// Digest of the uncompressed tar stream
    pub digest: Digest,
    /// Codec used for `file`
    pub compression: CompressionAlgorithm,
    /// Number of tar entries written
    pub entries: u64,
}

/// Stream `paths` into `temp` as a compressed, hashed tar archive.
///
/// On error the partially written `temp` is dropped, which deletes it.
#[instrument(skip_all, fields(compression = %options.compression, hash = %options.hash))]
pub fn write_archive(
    paths: &PathSet,
    options: &WriteOptions,
    mut temp: TempArchive,
) -> Result<CacheArtifact> {
    if temp.compression() != options.compression {
        return Err(Error::configuration(format!(
            "staging file is tagged {} but packaging uses {}",
            temp.compression(),
            options.compression
        )));
    }
    let staging = temp.path().to_path_buf();

    let (digest, tar_size, entries) = {
        let buffered = BufWriter::with_capacity(WRITE_BUFFER, temp.file_mut());
        let encoder = options
            .compression
            .encoder(buffered, options.compression_level)?;
        let tee = HashingWriter::new(encoder, options.hash.hasher());

        let mut builder = tar::Builder::new(tee);
        builder.follow_symlinks(false);
        builder.mode(if options.deterministic {
            HeaderMode::Deterministic
        } else {
            HeaderMode::Complete
        });

        let mut entries = 0u64;
        for root in paths {
            entries += append_tree(&mut builder, root)?;
        }

        let tee = builder
            .into_inner()
            .map_err(|e| Error::io(e, &staging, "finish tar stream"))?;
        let (encoder, digest, tar_size) = tee.into_parts();
        let mut buffered = encoder
            .finish()
            .map_err(|e| Error::io(e, &staging, "finish compression"))?;
        buffered
            .flush()
            .map_err(|e| Error::io(e, &staging, "flush"))?;
        (digest, tar_size, entries)
    };

    temp.file_mut()
        .sync_all()
        .map_err(|e| Error::io(e, &staging, "sync"))?;
    let archive_size = temp.len()?;
    temp.rewind()?;

    info!(
        paths = paths.len(),
        entries,
        tar_size,
        archive_size,
        digest = %digest,
        "Packaged archive"
    );

    Ok(CacheArtifact {
        file: temp,
        archive_size,
        tar_size,
        digest,
        compression: options.compression,
        entries,
    })
}

/// Name an absolute path is stored under: its root (and drive prefix) removed.
///
/// `/tmp/x/f` is stored as `tmp/x/f`.
#[must_use]
pub fn archive_name(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn append_tree<W: Write>(builder: &mut tar::Builder<W>, root: &Path) -> Result<u64> {
    let mut count = 0u64;
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io(std::io::Error::from(e), path, "walk")
        })?;
        let path = entry.path();

        if is_socket(&entry) {
            warn!(path = %path.display(), "Skipping socket");
            continue;
        }

        let name = archive_name(path);
        if name.as_os_str().is_empty() {
            // The filesystem root itself has no entry of its own
            continue;
        }

        builder
            .append_path_with_name(path, &name)
            .map_err(|e| Error::io(e, path, "append"))?;
        trace!(path = %path.display(), "Appended entry");
        count += 1;
    }
    Ok(count)
}

#[cfg(unix)]
fn is_socket(entry: &walkdir::DirEntry) -> bool {
    use std::os::unix::fs::FileTypeExt;
    entry.file_type().is_socket()
}

#[cfg(not(unix))]
fn is_socket(_entry: &walkdir::DirEntry) -> bool {
    false
}
