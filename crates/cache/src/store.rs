//! Object storage for packaged archives
//!
//! [`ObjectStore`] is the narrow interface the cache talks to: look up an
//! entry's metadata, upload an archive with its metadata, download it again and
//! delete it. Transport details stay behind the trait.
//!
//! ## Local layout
//!
//! ```text
//! <root>/
//!   <project-slug>-<hash8>/
//!     <branch-slug>-<hash8>/
//!       cache-<hex>.tar.zst   (archive, named after its digest)
//!       cache.json            (metadata sidecar)
//! ```
//!
//! Both files are staged under unique temp names and persisted with a rename.
//! The archive lands first and the sidecar is swapped in last, so the sidecar
//! only ever names an archive that is fully written and whose digest it records.

use crate::key::CacheKey;
use crate::metadata::ArtifactMetadata;
use crate::{Error, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

const SIDECAR_NAME: &str = "cache.json";
const OBJECT_PREFIX: &str = "cache-";

/// Attempts at reading an object whose sidecar was replaced mid-read
const GET_ATTEMPTS: usize = 3;

/// Storage backend for cache entries
pub trait ObjectStore: Send + Sync {
    /// Metadata of the entry, `None` if nothing is stored under `key`
    fn head(&self, key: &CacheKey) -> Result<Option<ArtifactMetadata>>;

    /// Store the archive read from `source` together with its metadata,
    /// replacing any previous entry
    fn put(
        &self,
        key: &CacheKey,
        source: &mut dyn Read,
        metadata: &ArtifactMetadata,
    ) -> Result<()>;

    /// Copy the stored archive into `sink` and return its metadata.
    ///
    /// Returns [`Error::NotFound`] if the entry does not exist.
    fn get(&self, key: &CacheKey, sink: &mut dyn Write) -> Result<ArtifactMetadata>;

    /// Remove the entry; returns whether anything was removed
    fn delete(&self, key: &CacheKey) -> Result<bool>;
}

/// Filesystem-backed [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`; the directory is created on first write
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.prefix())
    }

    fn sidecar_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(SIDECAR_NAME)
    }

    /// Path of the archive object described by `metadata` under `key`
    #[must_use]
    pub fn object_path(&self, key: &CacheKey, metadata: &ArtifactMetadata) -> PathBuf {
        self.root
            .join(key.object_name(&metadata.digest, metadata.compression))
    }

    fn read_sidecar(&self, key: &CacheKey) -> Result<Option<ArtifactMetadata>> {
        let path = self.sidecar_path(key);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        ArtifactMetadata::from_json(&json).map(Some)
    }

    /// Every archive object in the entry directory, referenced or not
    fn objects(&self, key: &CacheKey) -> Result<Vec<PathBuf>> {
        let dir = self.entry_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(e, &dir, "read_dir")),
        };
        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &dir, "read_dir"))?;
            if entry.file_name().to_string_lossy().starts_with(OBJECT_PREFIX) {
                objects.push(entry.path());
            }
        }
        Ok(objects)
    }
}

impl ObjectStore for LocalObjectStore {
    fn head(&self, key: &CacheKey) -> Result<Option<ArtifactMetadata>> {
        let Some(meta) = self.read_sidecar(key)? else {
            return Ok(None);
        };
        // A sidecar without its archive is a torn entry
        if self.object_path(key, &meta).is_file() {
            Ok(Some(meta))
        } else {
            debug!(key = %key, "Sidecar present but archive missing");
            Ok(None)
        }
    }

    fn put(
        &self,
        key: &CacheKey,
        source: &mut dyn Read,
        metadata: &ArtifactMetadata,
    ) -> Result<()> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;

        let object = self.object_path(key, metadata);
        let copied = write_atomic(&dir, &object, |file| {
            let copied = io::copy(source, file)?;
            if copied == metadata.archive_size {
                Ok(copied)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "archive has {copied} bytes but metadata records {}",
                        metadata.archive_size
                    ),
                ))
            }
        })?;

        let previous = self.read_sidecar(key).ok().flatten();

        let json = metadata.to_json()?;
        write_atomic(&dir, &self.sidecar_path(key), |file| {
            file.write_all(json.as_bytes())
        })?;

        // Only the archive the replaced sidecar named is released here; objects
        // staged by writers still in flight are left alone
        if let Some(previous) = previous {
            let old = self.object_path(key, &previous);
            if old != object {
                remove_if_present(&old)?;
            }
        }

        debug!(key = %key, object = %object.display(), bytes = copied, "Stored archive");
        Ok(())
    }

    fn get(&self, key: &CacheKey, sink: &mut dyn Write) -> Result<ArtifactMetadata> {
        // A concurrent put may release the object between head and open
        for _ in 0..GET_ATTEMPTS {
            let meta = self
                .head(key)?
                .ok_or_else(|| Error::not_found(key.prefix()))?;
            let object = self.object_path(key, &meta);
            let mut file = match fs::File::open(&object) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    trace!(key = %key, object = %object.display(), "Object replaced, retrying");
                    continue;
                }
                Err(e) => return Err(Error::io(e, &object, "open")),
            };
            let copied = io::copy(&mut file, sink).map_err(|e| Error::io(e, &object, "read"))?;
            trace!(key = %key, bytes = copied, "Fetched archive");
            return Ok(meta);
        }
        Err(Error::not_found(key.prefix()))
    }

    fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut removed = remove_if_present(&self.sidecar_path(key))?;
        for object in self.objects(key)? {
            removed |= remove_if_present(&object)?;
        }
        let dir = self.entry_dir(key);
        // Fails unless empty
        let _ = fs::remove_dir(&dir);
        if removed {
            debug!(key = %key, "Deleted entry");
        }
        Ok(removed)
    }
}

/// Write through a uniquely named temp file in `dir`, then rename into place.
///
/// The temp file is removed if `write` or the rename fails.
fn write_atomic<T>(
    dir: &Path,
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> io::Result<T>,
) -> Result<T> {
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| Error::io(e, dir, "create temp"))?;
    let value = write(staged.as_file_mut())
        .and_then(|value| staged.as_file().sync_all().map(|()| value))
        .map_err(|e| Error::io(e, path, "write"))?;
    staged
        .persist(path)
        .map_err(|e| Error::io(e.error, path, "persist"))?;
    Ok(value)
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(e, path, "remove")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FORMAT_VERSION;
    use chrono::Utc;
    use depot_archive::{CompressionAlgorithm, HashAlgorithm};
    use tempfile::TempDir;

    fn meta(key: &CacheKey, data: &[u8], compression: CompressionAlgorithm) -> ArtifactMetadata {
        ArtifactMetadata {
            format_version: FORMAT_VERSION,
            key: key.clone(),
            digest: HashAlgorithm::Sha256.digest(data),
            hash_algorithm: HashAlgorithm::Sha256,
            compression,
            archive_size: data.len() as u64,
            tar_size: data.len() as u64,
            created_at: Utc::now(),
        }
    }

    fn entry_names(tmp: &TempDir, key: &CacheKey) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(tmp.path().join(key.prefix()))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_head_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();
        assert!(store.head(&key).unwrap().is_none());
        assert!(matches!(
            store.get(&key, &mut Vec::new()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();
        let data = b"archive bytes".to_vec();
        let m = meta(&key, &data, CompressionAlgorithm::Zstd);

        store.put(&key, &mut &data[..], &m).unwrap();
        assert_eq!(store.head(&key).unwrap(), Some(m.clone()));
        assert!(store.object_path(&key, &m).is_file());

        let mut out = Vec::new();
        assert_eq!(store.get(&key, &mut out).unwrap(), m);
        assert_eq!(out, data);
    }

    #[test]
    fn test_put_replaces_previous_object() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();

        let first = b"one".to_vec();
        let first_meta = meta(&key, &first, CompressionAlgorithm::Zstd);
        store.put(&key, &mut &first[..], &first_meta).unwrap();

        let second = b"two".to_vec();
        let second_meta = meta(&key, &second, CompressionAlgorithm::Gzip);
        store.put(&key, &mut &second[..], &second_meta).unwrap();

        assert!(!store.object_path(&key, &first_meta).exists());
        assert_eq!(store.head(&key).unwrap(), Some(second_meta));
        assert_eq!(entry_names(&tmp, &key).len(), 2);
    }

    #[test]
    fn test_put_same_content_twice_keeps_object() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();
        let data = b"same".to_vec();
        let m = meta(&key, &data, CompressionAlgorithm::None);

        store.put(&key, &mut &data[..], &m).unwrap();
        store.put(&key, &mut &data[..], &m).unwrap();

        let mut out = Vec::new();
        store.get(&key, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();
        let mut m = meta(&key, b"abc", CompressionAlgorithm::None);
        m.archive_size = 10;

        let err = store.put(&key, &mut &b"abc"[..], &m).unwrap_err();
        match err {
            Error::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected I/O error, got {other:?}"),
        }
        assert!(store.head(&key).unwrap().is_none());
        assert!(entry_names(&tmp, &key).is_empty());
    }

    #[test]
    fn test_torn_entry_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();
        let data = b"x".to_vec();
        let m = meta(&key, &data, CompressionAlgorithm::Gzip);
        store.put(&key, &mut &data[..], &m).unwrap();
        fs::remove_file(store.object_path(&key, &m)).unwrap();
        assert!(store.head(&key).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();
        let data = b"x".to_vec();
        store
            .put(&key, &mut &data[..], &meta(&key, &data, CompressionAlgorithm::None))
            .unwrap();

        assert!(store.delete(&key).unwrap());
        assert!(store.head(&key).unwrap().is_none());
        assert!(!tmp.path().join(key.prefix()).exists());
        assert!(!store.delete(&key).unwrap());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();
        let data = b"payload".to_vec();
        let m = meta(&key, &data, CompressionAlgorithm::Zstd);
        store.put(&key, &mut &data[..], &m).unwrap();

        let object = format!("cache-{}.tar.zst", m.digest.as_hex());
        assert_eq!(entry_names(&tmp, &key), vec![object, SIDECAR_NAME.to_string()]);
    }

    #[test]
    fn test_concurrent_puts_never_mix_sidecar_and_archive() {
        const WRITERS: u8 = 4;
        const ROUNDS: usize = 10;
        const SIZE: usize = 256 * 1024;

        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let key = CacheKey::new("p", "main").unwrap();

        for round in 0..ROUNDS {
            let results: Vec<Result<()>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..WRITERS)
                    .map(|writer| {
                        let store = &store;
                        let key = &key;
                        scope.spawn(move || {
                            let fill = u8::try_from(round).unwrap() * WRITERS + writer;
                            let data = vec![fill; SIZE];
                            let m = meta(key, &data, CompressionAlgorithm::None);
                            store.put(key, &mut &data[..], &m)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            for result in results {
                result.unwrap();
            }

            let mut out = Vec::new();
            let m = store.get(&key, &mut out).unwrap();
            assert_eq!(out.len(), SIZE, "round {round}");
            assert_eq!(HashAlgorithm::Sha256.digest(&out), m.digest, "round {round}");
        }

        // Every staging file was persisted or cleaned up
        let names = entry_names(&tmp, &key);
        assert!(names.contains(&SIDECAR_NAME.to_string()), "{names:?}");
        assert!(
            names.iter().all(|n| n == SIDECAR_NAME || n.starts_with(OBJECT_PREFIX)),
            "{names:?}"
        );
    }
}
