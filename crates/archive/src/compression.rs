//! Streaming codecs for the packaged tar stream
//!
//! The compression algorithm decides two things: which encoder/decoder wraps the
//! tar byte stream, and which extension tag the staging file carries so the
//! scheme can be recovered from a file name alone.

use crate::{Error, Result};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::str::FromStr;

/// Codec applied to the tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Plain tar, no compression
    None,
    /// gzip (deflate) via flate2
    Gzip,
    /// Zstandard
    #[default]
    Zstd,
}

impl CompressionAlgorithm {
    /// All supported algorithms
    pub const ALL: [Self; 3] = [Self::None, Self::Gzip, Self::Zstd];

    /// Stable lowercase name, as used in configuration and metadata
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// File extension tag (without leading dot)
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "tar",
            Self::Gzip => "tar.gz",
            Self::Zstd => "tar.zst",
        }
    }

    /// Recover the algorithm from a file name such as `depot-abc123.tar.zst`
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        // Longest tags first so `.tar.gz` is not mistaken for `.tar`
        [Self::Zstd, Self::Gzip, Self::None]
            .into_iter()
            .find(|algo| name.ends_with(&format!(".{}", algo.extension())))
            .or_else(|| name.ends_with(".tgz").then_some(Self::Gzip))
    }

    /// Level used when none is configured
    #[must_use]
    pub fn default_level(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Gzip => 6,
            Self::Zstd => 3,
        }
    }

    /// Validate a level for this algorithm
    pub fn check_level(self, level: i32) -> Result<i32> {
        let range = match self {
            Self::None => 0..=0,
            Self::Gzip => 0..=9,
            Self::Zstd => 1..=22,
        };
        if range.contains(&level) {
            Ok(level)
        } else {
            Err(Error::configuration(format!(
                "compression level {level} is out of range {}..={} for {self}",
                range.start(),
                range.end()
            )))
        }
    }

    /// Wrap `inner` in a streaming encoder
    pub fn encoder<W: Write>(self, inner: W, level: Option<i32>) -> Result<Encoder<W>> {
        let level = self.check_level(level.unwrap_or_else(|| self.default_level()))?;
        Ok(match self {
            Self::None => Encoder::Identity(inner),
            Self::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                inner,
                Compression::new(level.unsigned_abs()),
            )),
            Self::Zstd => Encoder::Zstd(
                zstd::stream::write::Encoder::new(inner, level)
                    .map_err(|e| Error::io_no_path(e, "zstd encoder init"))?,
            ),
        })
    }

    /// Wrap `inner` in a streaming decoder
    pub fn decoder<'a, R: Read + 'a>(self, inner: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::None => Box::new(inner),
            Self::Gzip => Box::new(flate2::read::GzDecoder::new(BufReader::new(inner))),
            Self::Zstd => Box::new(
                zstd::stream::read::Decoder::new(inner)
                    .map_err(|e| Error::io_no_path(e, "zstd decoder init"))?,
            ),
        })
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "tar" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(Error::configuration(format!(
                "unknown compression algorithm: {other}"
            ))),
        }
    }
}

/// Streaming encoder over a writer
pub enum Encoder<W: Write> {
    /// Pass-through
    Identity(W),
    /// gzip
    Gzip(flate2::write::GzEncoder<W>),
    /// Zstandard
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Write the codec trailer and hand back the inner writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Identity(w) => Ok(w),
            Self::Gzip(enc) => enc.finish(),
            Self::Zstd(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Identity(w) => w.write(buf),
            Self::Gzip(enc) => enc.write(buf),
            Self::Zstd(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Identity(w) => w.flush(),
            Self::Gzip(enc) => enc.flush(),
            Self::Zstd(enc) => enc.flush(),
        }
    }
}
