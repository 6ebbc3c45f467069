//! Core data models shared by the ingest pipeline and the HTTP server.
//!
//! These types describe the index entries produced for every chunk and the
//! lifecycle status tracked for every upload.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Composite key of an index entry: the temp file a chunk was read from and
/// its position in read order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey {
    pub source_path: PathBuf,
    pub sequence: u64,
}

impl IndexKey {
    pub fn new(source_path: impl Into<PathBuf>, sequence: u64) -> Self {
        Self {
            source_path: source_path.into(),
            sequence,
        }
    }
}

/// Renders as a tuple literal: `('/uploads/temp_<id>.bin', 0)`.
impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        write_quoted(f, &self.source_path.to_string_lossy())?;
        write!(f, ", {})", self.sequence)
    }
}

/// Value of an index entry: the MD5 of the chunk bytes and the chunk's tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Lowercase hex MD5 digest of the chunk bytes.
    pub checksum: String,
    /// `{identifier}_{sequence}`; also the chunk file's stem.
    pub tag: String,
}

/// Renders as a tuple literal: `('<checksum>', '<tag>')`.
impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        write_quoted(f, &self.checksum)?;
        f.write_str(", ")?;
        write_quoted(f, &self.tag)?;
        f.write_str(")")
    }
}

/// Writes `s` as a quoted string literal. Single quotes unless `s` contains
/// a `'` and no `"`; backslashes, control characters and the chosen quote
/// are escaped.
fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    write!(f, "{}", quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{}", c)?,
            c if (c as u32) < 0x20 || c == '\x7f' => write!(f, "\\x{:02x}", c as u32)?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "{}", quote)
}

/// Where an upload is in the ingest pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    /// Temp file written, job waiting in the queue.
    Queued,
    /// A worker is chunking the temp file.
    Processing,
    /// All chunks written and indexed; temp file removed.
    Completed { chunks: u64, bytes: u64 },
    /// Ingest stopped early. Chunks written before the failure are kept.
    Failed { error: String },
}

impl UploadState {
    pub fn is_finished(&self) -> bool {
        matches!(self, UploadState::Completed { .. } | UploadState::Failed { .. })
    }
}

/// Status record for one upload, as returned by `GET /uploads/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct UploadStatus {
    pub upload_id: Uuid,
    #[serde(flatten)]
    pub state: UploadState,
    pub updated_at: DateTime<Utc>,
}
