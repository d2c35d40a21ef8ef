//! Vector index lifecycle: open, build, persist, rebuild and search.
//!
//! ```text
//!            build (≥1 chunk)            begin_rebuild
//!  Absent ───────────────────▶ Built ───────────────────▶ Stale
//!    ▲                           ▲                          │
//!    │       build (0 chunks)    │     build (≥1 chunk)     │
//!    └───────────────────────────┼──────────────────────────┘
//!                                └──────────────────────────┘
//! ```
//!
//! The loaded [`VectorIndex`] is shared as an `Arc`. Queries clone the `Arc`
//! through [`VectorIndexManager::snapshot`] and keep searching the same
//! index even if the manager is rebuilt or reloaded meanwhile.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libre_chat_core::index::{VectorIndex, VectorIndexEntry};
use libre_chat_core::models::Chunk;
use libre_chat_core::{ChatError, Result};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// Nothing persisted or loaded.
    Absent,
    /// A loaded index is available for search.
    Built,
    /// The previous index was discarded and a new one is being built.
    Stale,
}

pub struct VectorIndexManager {
    path: PathBuf,
    model: String,
    dims: usize,
    state: IndexState,
    index: Option<Arc<VectorIndex>>,
}

impl VectorIndexManager {
    /// Open the index persisted at `path`, if any, for an embedder producing
    /// `dims`-dimensional vectors with `model`.
    ///
    /// # Errors
    ///
    /// [`ChatError::Configuration`] if the persisted index was built with a
    /// different dimension, [`ChatError::Index`] if it cannot be decoded.
    pub fn open(path: impl Into<PathBuf>, model: &str, dims: usize) -> Result<Self> {
        let mut manager = Self::unloaded(path, model, dims);
        manager.reload()?;
        Ok(manager)
    }

    /// A manager for `path` that has not read anything from disk yet
    /// (state `Absent`). Used before a forced rebuild, where the persisted
    /// files may be unreadable.
    pub fn unloaded(path: impl Into<PathBuf>, model: &str, dims: usize) -> Self {
        Self {
            path: path.into(),
            model: model.to_string(),
            dims,
            state: IndexState::Absent,
            index: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == IndexState::Built
    }

    /// The currently loaded index, shared with the caller.
    pub fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.index.clone()
    }

    /// Re-read the persisted index from disk.
    pub fn reload(&mut self) -> Result<()> {
        if !VectorIndex::exists(&self.path) {
            self.index = None;
            self.state = IndexState::Absent;
            return Ok(());
        }
        let index = VectorIndex::load(&self.path)?;
        if index.dims() != self.dims {
            return Err(ChatError::Configuration(format!(
                "vector index at {} has {} dims but the embedding model produces {}",
                self.path.display(),
                index.dims(),
                self.dims
            )));
        }
        if index.model() != self.model {
            warn!(
                path = %self.path.display(),
                index_model = index.model(),
                embedder_model = %self.model,
                "Vector index was built with a different embedding model"
            );
        }
        info!(path = %self.path.display(), entries = index.len(), "Loaded vector index");
        self.index = Some(Arc::new(index));
        self.state = IndexState::Built;
        Ok(())
    }

    /// Build an in-memory index from chunks and their vectors.
    ///
    /// Zero chunks is a no-op that leaves no index (state `Absent`).
    pub fn build(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunks.is_empty() {
            warn!(path = %self.path.display(), "No chunks to index, vector index not built");
            if self.state == IndexState::Stale {
                self.state = IndexState::Absent;
            }
            return Ok(());
        }
        let index = VectorIndex::build(self.model.clone(), self.dims, chunks, vectors)?;
        info!(entries = index.len(), dims = self.dims, "Built vector index");
        self.index = Some(Arc::new(index));
        self.state = IndexState::Built;
        Ok(())
    }

    /// Write the loaded index to `path`. Does nothing when no index is loaded.
    pub fn persist(&self) -> Result<()> {
        if let Some(index) = &self.index {
            index.save(&self.path)?;
            info!(path = %self.path.display(), entries = index.len(), "Persisted vector index");
        }
        Ok(())
    }

    /// Discard the loaded index and the persisted files (Built → Stale).
    pub fn begin_rebuild(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
        }
        self.index = None;
        self.state = IndexState::Stale;
        Ok(())
    }

    /// Replace the index: discard, build and persist.
    pub fn rebuild(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        self.begin_rebuild()?;
        self.build(chunks, vectors)?;
        self.persist()
    }

    /// Up to `k` `(entry, score)` pairs by descending cosine similarity.
    /// Returns nothing while no index is loaded.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<(VectorIndexEntry, f32)>> {
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };
        Ok(index
            .search(query, k, score_threshold)?
            .into_iter()
            .map(|hit| (hit.entry.clone(), hit.score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libre_chat_core::models::Metadata;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn open_missing_path_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = VectorIndexManager::open(tmp.path().join("db"), "m", 2).unwrap();
        assert_eq!(manager.state(), IndexState::Absent);
        assert!(manager.search(&[1.0, 0.0], 4, None).unwrap().is_empty());
    }

    #[test]
    fn empty_build_stays_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = VectorIndexManager::open(tmp.path().join("db"), "m", 2).unwrap();
        manager.build(Vec::new(), Vec::new()).unwrap();
        manager.persist().unwrap();
        assert_eq!(manager.state(), IndexState::Absent);
        assert!(!tmp.path().join("db").exists());
    }

    #[test]
    fn build_persist_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        let mut manager = VectorIndexManager::open(&path, "m", 2).unwrap();
        manager
            .build(vec![chunk("a"), chunk("b")], vec![vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        manager.persist().unwrap();
        assert!(manager.is_built());

        let reopened = VectorIndexManager::open(&path, "m", 2).unwrap();
        assert_eq!(reopened.state(), IndexState::Built);
        let hits = reopened.search(&[0.0, 1.0], 1, None).unwrap();
        assert_eq!(hits[0].0.text, "b");
    }

    #[test]
    fn reopening_with_other_dims_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        let mut manager = VectorIndexManager::open(&path, "m", 2).unwrap();
        manager.build(vec![chunk("a")], vec![vec![1.0, 0.0]]).unwrap();
        manager.persist().unwrap();

        let err = VectorIndexManager::open(&path, "m", 3).err().unwrap();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn rebuild_goes_through_stale_and_keeps_old_snapshots_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        let mut manager = VectorIndexManager::open(&path, "m", 2).unwrap();
        manager.build(vec![chunk("old")], vec![vec![1.0, 0.0]]).unwrap();
        manager.persist().unwrap();
        let in_flight = manager.snapshot().unwrap();

        manager.begin_rebuild().unwrap();
        assert_eq!(manager.state(), IndexState::Stale);
        assert!(!path.exists());

        manager.build(vec![chunk("new")], vec![vec![0.0, 1.0]]).unwrap();
        manager.persist().unwrap();
        assert_eq!(manager.state(), IndexState::Built);
        assert_eq!(in_flight.entries()[0].text, "old");
        assert_eq!(manager.snapshot().unwrap().entries()[0].text, "new");
    }

    #[test]
    fn rebuild_with_no_chunks_ends_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        let mut manager = VectorIndexManager::open(&path, "m", 2).unwrap();
        manager.build(vec![chunk("a")], vec![vec![1.0, 0.0]]).unwrap();
        manager.persist().unwrap();

        manager.rebuild(Vec::new(), Vec::new()).unwrap();
        assert_eq!(manager.state(), IndexState::Absent);
        assert!(manager.snapshot().is_none());
    }
}
