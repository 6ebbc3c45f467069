//! Fixed-size byte chunker.
//!
//! [`ChunkReader`] pulls successive slices of `chunk_size` bytes from a file
//! (or any async reader) until EOF. Only the final slice may be shorter.
//! At most one chunk is held in memory at a time.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the buffer reserved before a chunk is read.
const MAX_PREALLOC: usize = 64 * 1024;

/// Lazy, sequential, fixed-size chunk source.
///
/// Not restartable: to read the data again, open a new reader.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    exhausted: bool,
}

impl ChunkReader<File> {
    /// Opens `path` for chunked reading.
    pub async fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path).await?;
        Self::new(file, chunk_size)
    }
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Wraps `reader`. A zero `chunk_size` is rejected with `InvalidInput`.
    pub fn new(reader: R, chunk_size: usize) -> io::Result<Self> {
        if chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be > 0",
            ));
        }
        Ok(Self {
            reader,
            chunk_size,
            exhausted: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the next chunk, or `None` once the reader is exhausted.
    ///
    /// Short reads are retried until the chunk is full or a read returns zero
    /// bytes, so every chunk but the last is exactly `chunk_size` long. The
    /// buffer grows with the bytes actually read, never to `chunk_size` up
    /// front.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = Vec::with_capacity(self.chunk_size.min(MAX_PREALLOC));
        let limit = self.chunk_size as u64;
        let filled = (&mut self.reader).take(limit).read_to_end(&mut buf).await?;

        if filled < self.chunk_size {
            self.exhausted = true;
        }
        if filled == 0 {
            return Ok(None);
        }
        Ok(Some(buf))
    }
}
