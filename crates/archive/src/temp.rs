//! Scoped staging files for archives in transit
//!
//! A [`TempArchive`] owns a uniquely named file whose extension encodes the
//! compression algorithm (`depot-XXXXXX.tar.zst`). Dropping it closes the handle
//! and deletes the file, on success and error paths alike; [`TempArchive::keep`]
//! opts out of the deletion.

use crate::compression::CompressionAlgorithm;
use crate::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

const PREFIX: &str = "depot-";

/// Staging file holding a packaged archive before upload or after download
#[derive(Debug)]
pub struct TempArchive {
    file: NamedTempFile,
    compression: CompressionAlgorithm,
}

impl TempArchive {
    /// Create a staging file in the system temp directory
    pub fn new(compression: CompressionAlgorithm) -> Result<Self> {
        Self::new_in(std::env::temp_dir(), compression)
    }

    /// Create a staging file in `dir`, creating the directory if needed
    pub fn new_in(dir: impl AsRef<Path>, compression: CompressionAlgorithm) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        let suffix = format!(".{}", compression.extension());
        let file = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(&suffix)
            .tempfile_in(dir)
            .map_err(|e| Error::io(e, dir, "create temp file"))?;
        trace!(path = %file.path().display(), "Created staging file");
        Ok(Self { file, compression })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Compression the archive in this file uses
    #[must_use]
    pub fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }

    /// Open handle
    pub fn file_mut(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Current length of the backing file in bytes
    pub fn len(&self) -> Result<u64> {
        self.file
            .as_file()
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::io(e, self.path(), "metadata"))
    }

    /// True if nothing has been written yet
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Seek back to the first byte so the archive can be read from the start
    pub fn rewind(&mut self) -> Result<()> {
        let path = self.file.path().to_path_buf();
        self.file
            .as_file_mut()
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(e, path, "seek"))?;
        Ok(())
    }

    /// Truncate the file, discarding a partially written archive
    pub fn reset(&mut self) -> Result<()> {
        let path = self.file.path().to_path_buf();
        self.file
            .as_file_mut()
            .set_len(0)
            .map_err(|e| Error::io(e, &path, "truncate"))?;
        self.rewind()
    }

    /// Keep the backing file on disk and return its path
    pub fn keep(self) -> Result<PathBuf> {
        let (_file, path) = self
            .file
            .keep()
            .map_err(|e| Error::io_no_path(e.error, "persist temp file"))?;
        debug!(path = %path.display(), "Keeping staging file");
        Ok(path)
    }
}

impl Read for TempArchive {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[test]
    fn test_file_name_encodes_compression() {
        let dir = TempDir::new().unwrap();
        for algo in CompressionAlgorithm::ALL {
            let temp = TempArchive::new_in(dir.path(), algo).unwrap();
            let name = temp.path().file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with(PREFIX), "{name}");
            assert_eq!(CompressionAlgorithm::from_file_name(&name), Some(algo));
        }
    }

    #[test]
    fn test_drop_removes_backing_file() {
        let dir = TempDir::new().unwrap();
        let path = {
            let temp = TempArchive::new_in(dir.path(), CompressionAlgorithm::Gzip).unwrap();
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_on_error_path_removes_backing_file() {
        let dir = TempDir::new().unwrap();
        let mut seen = None;
        let result: Result<()> = (|| {
            let mut temp = TempArchive::new_in(dir.path(), CompressionAlgorithm::Zstd)?;
            temp.file_mut().write_all(b"partial").unwrap();
            seen = Some(temp.path().to_path_buf());
            Err(Error::configuration("simulated failure"))
        })();
        assert!(result.is_err());
        assert!(!seen.unwrap().exists());
    }

    #[test]
    fn test_keep_persists_file() {
        let dir = TempDir::new().unwrap();
        let mut temp = TempArchive::new_in(dir.path(), CompressionAlgorithm::None).unwrap();
        temp.file_mut().write_all(b"kept").unwrap();
        let path = temp.keep().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"kept");
    }

    #[test]
    fn test_rewind_and_reset() {
        let dir = TempDir::new().unwrap();
        let mut temp = TempArchive::new_in(dir.path(), CompressionAlgorithm::None).unwrap();
        temp.file_mut().write_all(b"abc").unwrap();
        assert_eq!(temp.len().unwrap(), 3);

        temp.rewind().unwrap();
        let mut buf = String::new();
        temp.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "abc");

        temp.reset().unwrap();
        assert!(temp.is_empty().unwrap());
    }
}
