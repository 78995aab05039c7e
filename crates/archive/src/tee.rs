//! Fan-out adapters that hash a byte stream while it passes through.
//!
//! Both adapters hand every chunk to the hasher and to the inner stage before
//! returning, so the slower of the two sets the pace and nothing is buffered
//! beyond the chunk in flight.

use crate::hash::{ContentHasher, Digest};
use std::io::{self, Read, Write};

/// Writer that hashes exactly the bytes accepted by the inner writer
pub struct HashingWriter<W> {
    inner: W,
    hasher: ContentHasher,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Tee writes to `inner` and `hasher`
    pub fn new(inner: W, hasher: ContentHasher) -> Self {
        Self {
            inner,
            hasher,
            bytes: 0,
        }
    }

    /// Split into the inner writer, the digest and the byte count
    pub fn into_parts(self) -> (W, Digest, u64) {
        (self.inner, self.hasher.finalize(), self.bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Only hash what the inner stage accepted, short writes included
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that hashes every byte handed to the consumer
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    /// Tee reads from `inner` into `hasher`
    pub fn new(inner: R, hasher: ContentHasher) -> Self {
        Self {
            inner,
            hasher,
            bytes: 0,
        }
    }

    /// Read the rest of the stream so the digest covers it, returning the
    /// number of trailing bytes consumed
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    /// Consume the reader and produce the digest and byte count
    #[must_use]
    pub fn finish(self) -> (Digest, u64) {
        (self.hasher.finalize(), self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes += n as u64;
        }
        Ok(n)
    }
}
