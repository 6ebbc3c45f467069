//! Ingest worker.
//!
//! Drains a [`ChunkReader`] over an upload's temp file and, for every chunk
//! in read order:
//!
//! 1. computes the MD5 of the raw bytes (lowercase hex),
//! 2. builds the tag `{identifier}_{sequence}`,
//! 3. writes the bytes to `{uploads_dir}/{tag}.bin`,
//! 4. records `(source_path, sequence) → (checksum, tag)` in the index.
//!
//! The temp file is removed on every exit path. Chunk files and index
//! entries written before a failure stay in place; there is no rollback.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunk::ChunkReader;
use crate::index::ChunkIndex;
use crate::models::{IndexEntry, IndexKey};

/// One unit of work: chunk `source_path` into `uploads_dir`.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub upload_id: Uuid,
    pub source_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub chunk_size: usize,
}

impl IngestJob {
    /// Job for an upload whose temp file sits at the standard location.
    pub fn for_upload(upload_id: Uuid, uploads_dir: &Path, chunk_size: usize) -> Self {
        Self {
            upload_id,
            source_path: temp_path(uploads_dir, &upload_id),
            uploads_dir: uploads_dir.to_path_buf(),
            chunk_size,
        }
    }
}

/// Outcome of a successful [`store_chunks`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub upload_id: Uuid,
    pub chunks: u64,
    pub bytes: u64,
}

/// `{uploads_dir}/temp_{identifier}.bin`
pub fn temp_path(uploads_dir: &Path, upload_id: &Uuid) -> PathBuf {
    uploads_dir.join(format!("temp_{}.bin", upload_id))
}

/// `{identifier}_{sequence}`
pub fn chunk_tag(upload_id: &Uuid, sequence: u64) -> String {
    format!("{}_{}", upload_id, sequence)
}

/// `{uploads_dir}/{tag}.bin`
pub fn chunk_path(uploads_dir: &Path, tag: &str) -> PathBuf {
    uploads_dir.join(format!("{}.bin", tag))
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

/// Chunks, stores, and indexes one upload, then deletes its temp file.
pub async fn store_chunks(job: &IngestJob, index: &dyn ChunkIndex) -> Result<IngestReport> {
    let source = SourceFile::new(&job.source_path);

    let mut reader = ChunkReader::open(source.path(), job.chunk_size)
        .await
        .with_context(|| format!("Failed to open upload: {}", job.source_path.display()))?;
    debug!(
        upload_id = %job.upload_id,
        chunk_size = reader.chunk_size(),
        "chunking upload"
    );

    let mut sequence: u64 = 0;
    let mut bytes: u64 = 0;

    while let Some(chunk) = reader
        .next_chunk()
        .await
        .with_context(|| format!("Failed to read upload: {}", job.source_path.display()))?
    {
        let checksum = md5_hex(&chunk);
        let tag = chunk_tag(&job.upload_id, sequence);
        let path = chunk_path(&job.uploads_dir, &tag);

        write_chunk(&path, &chunk)
            .await
            .with_context(|| format!("Failed to write chunk: {}", path.display()))?;

        index
            .insert(
                IndexKey::new(&job.source_path, sequence),
                IndexEntry {
                    checksum: checksum.clone(),
                    tag,
                },
            )
            .await?;

        debug!(
            upload_id = %job.upload_id,
            sequence,
            len = chunk.len(),
            %checksum,
            "stored chunk"
        );

        sequence += 1;
        bytes += chunk.len() as u64;
    }

    drop(reader);
    source.remove().await?;

    Ok(IngestReport {
        upload_id: job.upload_id,
        chunks: sequence,
        bytes,
    })
}

async fn write_chunk(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

/// Owns an upload's temp file for the duration of a job.
///
/// [`SourceFile::remove`] deletes it and reports errors. Dropping the guard
/// without calling it removes the file best-effort.
struct SourceFile {
    path: PathBuf,
    armed: bool,
}

impl SourceFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) -> Result<()> {
        self.armed = false;
        tokio::fs::remove_file(&self.path)
            .await
            .with_context(|| format!("Failed to remove upload: {}", self.path.display()))
    }
}

impl Drop for SourceFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed temp file after failed ingest"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temp file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use tempfile::TempDir;

    fn setup(contents: &[u8], chunk_size: usize) -> (TempDir, IngestJob) {
        let tmp = TempDir::new().unwrap();
        let job = IngestJob::for_upload(Uuid::new_v4(), tmp.path(), chunk_size);
        std::fs::write(&job.source_path, contents).unwrap();
        (tmp, job)
    }

    #[test]
    fn test_naming() {
        let id = Uuid::nil();
        let dir = Path::new("/tmp/x");
        assert_eq!(
            temp_path(dir, &id),
            PathBuf::from("/tmp/x/temp_00000000-0000-0000-0000-000000000000.bin")
        );
        assert_eq!(chunk_tag(&id, 7), "00000000-0000-0000-0000-000000000000_7");
        assert_eq!(chunk_path(dir, "abc_7"), PathBuf::from("/tmp/x/abc_7.bin"));
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn test_ten_bytes_chunk_size_four() {
        let (tmp, job) = setup(b"0123456789", 4);
        let index = InMemoryIndex::new();

        let report = store_chunks(&job, &index).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.bytes, 10);
        assert!(!job.source_path.exists(), "temp file should be removed");

        let expected: [&[u8]; 3] = [b"0123", b"4567", b"89"];
        for (seq, want) in expected.iter().enumerate() {
            let tag = chunk_tag(&job.upload_id, seq as u64);
            let got = std::fs::read(chunk_path(tmp.path(), &tag)).unwrap();
            assert_eq!(&got[..], *want);
        }

        let entries = index.entries_for(&job.source_path).await.unwrap();
        assert_eq!(entries.len(), 3);
        for (seq, entry) in &entries {
            let bytes = std::fs::read(chunk_path(tmp.path(), &entry.tag)).unwrap();
            assert_eq!(entry.checksum, md5_hex(&bytes));
            assert_eq!(entry.tag, chunk_tag(&job.upload_id, *seq));
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let (tmp, job) = setup(&data, 333);
        let index = InMemoryIndex::new();

        let report = store_chunks(&job, &index).await.unwrap();
        assert_eq!(report.chunks, data.len().div_ceil(333) as u64);

        let mut rebuilt = Vec::new();
        for seq in 0..report.chunks {
            let tag = chunk_tag(&job.upload_id, seq);
            rebuilt.extend(std::fs::read(chunk_path(tmp.path(), &tag)).unwrap());
        }
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_empty_upload() {
        let (tmp, job) = setup(b"", 4);
        let index = InMemoryIndex::new();

        let report = store_chunks(&job, &index).await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.bytes, 0);
        assert_eq!(index.len().await.unwrap(), 0);
        assert!(!job.source_path.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_chunk_size_larger_than_upload() {
        let (tmp, job) = setup(b"0123456789", 1usize << 40);
        let index = InMemoryIndex::new();

        let report = store_chunks(&job, &index).await.unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(report.bytes, 10);
        let chunk = chunk_path(tmp.path(), &chunk_tag(&job.upload_id, 0));
        assert_eq!(std::fs::read(chunk).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let tmp = TempDir::new().unwrap();
        let job = IngestJob::for_upload(Uuid::new_v4(), tmp.path(), 4);
        let index = InMemoryIndex::new();

        let err = store_chunks(&job, &index).await.unwrap_err();
        assert!(err.to_string().contains("Failed to open upload"));
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_removes_temp_file() {
        let (tmp, mut job) = setup(b"0123456789", 4);
        job.uploads_dir = tmp.path().join("missing");
        let index = InMemoryIndex::new();

        let err = store_chunks(&job, &index).await.unwrap_err();
        assert!(err.to_string().contains("Failed to write chunk"));
        assert!(!job.source_path.exists(), "temp file should be cleaned up");
        assert_eq!(index.len().await.unwrap(), 0);
    }
}
