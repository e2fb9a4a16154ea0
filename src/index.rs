//! In-memory embedding index.
//!
//! [`IndexHandle`] owns the loaded snapshot. Loading is lazy: the first
//! [`IndexHandle::current`] call reads the snapshot from disk, later calls
//! share the cached copy. [`IndexHandle::reload`] re-reads the file and
//! swaps the cached `Arc`, so a request that already holds the previous
//! index keeps reading a complete, consistent snapshot.
//!
//! A missing snapshot file is not an error: it means the index has not been
//! built yet, and is reported as `Ok(None)`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::{EmbeddedRecord, IndexSnapshot};
use crate::sections::TextIndex;

/// A snapshot plus the structures derived from it at load time.
#[derive(Debug)]
pub struct LoadedIndex {
    pub snapshot: IndexSnapshot,
    pub text_index: TextIndex,
}

impl LoadedIndex {
    /// Validate a snapshot and derive its text index.
    pub fn new(snapshot: IndexSnapshot) -> Result<Self> {
        let dims = snapshot.records.first().map(|r| r.embedding.len());
        if let Some(dims) = dims {
            if let Some(bad) = snapshot.records.iter().find(|r| r.embedding.len() != dims) {
                bail!(
                    "Record {} has {} dimensions, expected {}",
                    bad.id,
                    bad.embedding.len(),
                    dims
                );
            }
        }

        let text_index = TextIndex::build(&snapshot.records);
        Ok(Self {
            snapshot,
            text_index,
        })
    }

    pub fn records(&self) -> &[EmbeddedRecord] {
        &self.snapshot.records
    }

    pub fn model(&self) -> &str {
        &self.snapshot.model
    }

    pub fn len(&self) -> usize {
        self.snapshot.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.records.is_empty()
    }
}

pub struct IndexHandle {
    path: PathBuf,
    cached: RwLock<Option<Arc<LoadedIndex>>>,
}

impl IndexHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// A handle pre-populated with an in-memory index.
    pub fn with_index(path: impl Into<PathBuf>, index: LoadedIndex) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(Some(Arc::new(index))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot from disk without touching the cache.
    pub fn load(&self) -> Result<Option<LoadedIndex>> {
        read_snapshot(&self.path)?
            .map(LoadedIndex::new)
            .transpose()
            .with_context(|| format!("Invalid index snapshot: {}", self.path.display()))
    }

    /// The cached index, loading it on first use.
    pub fn current(&self) -> Result<Option<Arc<LoadedIndex>>> {
        if let Some(index) = self.cached() {
            return Ok(Some(index));
        }
        self.reload()
    }

    /// Re-read the snapshot and replace the cached index.
    ///
    /// When the file has disappeared the cache is cleared.
    pub fn reload(&self) -> Result<Option<Arc<LoadedIndex>>> {
        let loaded = self.load()?.map(Arc::new);
        let mut guard = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        *guard = loaded.clone();
        drop(guard);

        match &loaded {
            Some(index) => tracing::info!(
                path = %self.path.display(),
                records = index.len(),
                model = index.model(),
                "index loaded"
            ),
            None => tracing::warn!(path = %self.path.display(), "index snapshot not found"),
        }
        Ok(loaded)
    }

    /// Cached index without touching the disk.
    pub fn cached(&self) -> Option<Arc<LoadedIndex>> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn read_snapshot(path: &Path) -> Result<Option<IndexSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index snapshot: {}", path.display()))?;
    let snapshot = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse index snapshot: {}", path.display()))?;
    Ok(Some(snapshot))
}

/// Write a snapshot as pretty JSON, creating parent directories.
pub fn write_snapshot(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write index snapshot: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn snapshot(texts: &[&str]) -> IndexSnapshot {
        let records: Vec<EmbeddedRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| EmbeddedRecord {
                id: format!("chunk-{}", i + 1),
                text: t.to_string(),
                embedding: vec![i as f32, 1.0],
            })
            .collect();
        IndexSnapshot {
            source: None,
            model: "test-model".to_string(),
            created_at: Utc::now(),
            count: records.len(),
            records,
        }
    }

    #[test]
    fn test_missing_file_is_absent_not_error() {
        let tmp = TempDir::new().unwrap();
        let handle = IndexHandle::new(tmp.path().join("nope.json"));
        assert!(handle.load().unwrap().is_none());
        assert!(handle.current().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let handle = IndexHandle::new(&path);
        assert!(handle.load().is_err());
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let mut snap = snapshot(&["a", "b"]);
        snap.records[1].embedding = vec![1.0, 2.0, 3.0];
        assert!(LoadedIndex::new(snap).is_err());
    }

    #[test]
    fn test_current_is_cached_until_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data/embeddings.json");
        write_snapshot(&path, &snapshot(&["one"])).unwrap();

        let handle = IndexHandle::new(&path);
        let first = handle.current().unwrap().unwrap();
        assert_eq!(first.len(), 1);

        write_snapshot(&path, &snapshot(&["one", "two", "three"])).unwrap();
        assert_eq!(handle.current().unwrap().unwrap().len(), 1);

        let reloaded = handle.reload().unwrap().unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(handle.current().unwrap().unwrap().len(), 3);

        // Earlier readers keep their own snapshot.
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_reload_after_delete_clears_cache() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("embeddings.json");
        write_snapshot(&path, &snapshot(&["one"])).unwrap();
        let handle = IndexHandle::new(&path);
        assert!(handle.current().unwrap().is_some());

        std::fs::remove_file(&path).unwrap();
        assert!(handle.reload().unwrap().is_none());
        assert!(handle.cached().is_none());
    }
}
