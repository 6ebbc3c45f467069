//! Chunk index storage.
//!
//! The [`ChunkIndex`] trait is the seam between the ingest worker and
//! whatever holds the `(source path, sequence) → (checksum, tag)` mapping.
//! [`InMemoryIndex`] is the process-local implementation used by the server;
//! tests construct their own isolated instances.
//!
//! Entries are insert-only. A second insert under the same key replaces the
//! first, which only happens if two uploads share a temp path.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{IndexEntry, IndexKey};

/// Abstract chunk index backend.
///
/// Async (via `async-trait`) so a persistent backend can be dropped in
/// without touching the worker; the in-memory store returns ready futures.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Records one chunk.
    async fn insert(&self, key: IndexKey, entry: IndexEntry) -> Result<()>;

    /// All entries, ordered by source path then sequence.
    async fn entries(&self) -> Result<Vec<(IndexKey, IndexEntry)>>;

    /// Entries recorded for one source file, in sequence order.
    async fn entries_for(&self, source_path: &Path) -> Result<Vec<(u64, IndexEntry)>>;

    /// Number of recorded entries.
    async fn len(&self) -> Result<usize>;
}

/// `BTreeMap` behind a `std::sync::RwLock`.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<BTreeMap<IndexKey, IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("chunk index lock poisoned")
}

#[async_trait]
impl ChunkIndex for InMemoryIndex {
    async fn insert(&self, key: IndexKey, entry: IndexEntry) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key, entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(IndexKey, IndexEntry)>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn entries_for(&self, source_path: &Path) -> Result<Vec<(u64, IndexEntry)>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .iter()
            .filter(|(k, _)| k.source_path == source_path)
            .map(|(k, v)| (k.sequence, v.clone()))
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(checksum: &str, tag: &str) -> IndexEntry {
        IndexEntry {
            checksum: checksum.to_string(),
            tag: tag.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty() {
        let index = InMemoryIndex::new();
        assert_eq!(index.len().await.unwrap(), 0);
        assert!(index.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_for_filters_and_orders() {
        let index = InMemoryIndex::new();
        index
            .insert(IndexKey::new("/u/temp_b.bin", 1), entry("b1", "b_1"))
            .await
            .unwrap();
        index
            .insert(IndexKey::new("/u/temp_a.bin", 0), entry("a0", "a_0"))
            .await
            .unwrap();
        index
            .insert(IndexKey::new("/u/temp_b.bin", 0), entry("b0", "b_0"))
            .await
            .unwrap();

        assert_eq!(index.len().await.unwrap(), 3);

        let b = index.entries_for(Path::new("/u/temp_b.bin")).await.unwrap();
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].0, 0);
        assert_eq!(b[0].1.tag, "b_0");
        assert_eq!(b[1].0, 1);
        assert_eq!(b[1].1.tag, "b_1");

        let all = index.entries().await.unwrap();
        assert_eq!(all[0].0.source_path, Path::new("/u/temp_a.bin"));
    }

    #[tokio::test]
    async fn test_same_key_replaces() {
        let index = InMemoryIndex::new();
        let key = IndexKey::new("/u/temp_a.bin", 0);
        index.insert(key.clone(), entry("old", "a_0")).await.unwrap();
        index.insert(key, entry("new", "a_0")).await.unwrap();
        let all = index.entries().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.checksum, "new");
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let a = InMemoryIndex::new();
        let b = InMemoryIndex::new();
        a.insert(IndexKey::new("/u/temp_a.bin", 0), entry("x", "a_0"))
            .await
            .unwrap();
        assert_eq!(a.len().await.unwrap(), 1);
        assert_eq!(b.len().await.unwrap(), 0);
    }
}
