//! Flat vector index with brute-force cosine search.
//!
//! A [`VectorIndex`] is an in-memory list of [`VectorIndexEntry`] values, all
//! embedded with the same model. Search scans every entry, which is fine for
//! the corpus sizes a single chat deployment ingests.
//!
//! # On-disk layout
//!
//! An index is persisted as a directory:
//!
//! ```text
//! <vector_path>/
//!   index.json    manifest: model, dims, entry texts + metadata, checksum
//!   vectors.bin   entries × dims little-endian f32 values
//! ```
//!
//! The manifest stores a SHA-256 of `vectors.bin`; a mismatch on load is an
//! [`ChatError::Index`] error.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ChatError, Result};
use crate::models::{Chunk, Metadata};

pub const MANIFEST_FILE: &str = "index.json";
pub const VECTORS_FILE: &str = "vectors.bin";
const FORMAT_VERSION: u32 = 1;

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexEntry {
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// A search result: the matched entry and its cosine similarity.
#[derive(Debug, Clone)]
pub struct SearchHit<'a> {
    pub entry: &'a VectorIndexEntry,
    pub score: f32,
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    model: String,
    dims: usize,
    vectors_sha256: String,
    entries: Vec<Chunk>,
}

/// Embedded chunks for one embedding model.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<VectorIndexEntry>,
}

impl VectorIndex {
    /// Pair chunks with their vectors.
    ///
    /// # Errors
    ///
    /// [`ChatError::Index`] when the two lists differ in length, and
    /// [`ChatError::Configuration`] when a vector does not have `dims` entries.
    pub fn build(
        model: impl Into<String>,
        dims: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(ChatError::Index(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            if vector.len() != dims {
                return Err(dimension_mismatch(dims, vector.len()));
            }
            entries.push(VectorIndexEntry {
                vector,
                text: chunk.text,
                metadata: chunk.metadata,
            });
        }
        Ok(Self {
            model: model.into(),
            dims,
            entries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[VectorIndexEntry] {
        &self.entries
    }

    /// Up to `k` entries ordered by descending cosine similarity.
    ///
    /// Entries scoring below `score_threshold` are excluded, so the result
    /// may be empty. Ties keep insertion order.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit<'_>>> {
        if query.len() != self.dims {
            return Err(dimension_mismatch(self.dims, query.len()));
        }
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                entry,
                score: cosine_similarity(query, &entry.vector),
            })
            .filter(|hit| score_threshold.map_or(true, |t| hit.score >= t))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Write `index.json` and `vectors.bin` into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut blob = Vec::with_capacity(self.entries.len() * self.dims * 4);
        for entry in &self.entries {
            blob.extend_from_slice(&vec_to_blob(&entry.vector));
        }
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            model: self.model.clone(),
            dims: self.dims,
            vectors_sha256: fingerprint(&blob),
            entries: self
                .entries
                .iter()
                .map(|e| Chunk {
                    text: e.text.clone(),
                    metadata: e.metadata.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ChatError::Index(format!("failed to encode manifest: {}", e)))?;
        fs::write(dir.join(VECTORS_FILE), &blob)?;
        fs::write(dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Load an index previously written by [`VectorIndex::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = fs::read(&manifest_path)?;
        let manifest: Manifest = serde_json::from_slice(&raw).map_err(|e| {
            ChatError::Index(format!("invalid {}: {}", manifest_path.display(), e))
        })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(ChatError::Index(format!(
                "unsupported index format version {}",
                manifest.format_version
            )));
        }

        let blob = fs::read(dir.join(VECTORS_FILE))?;
        if fingerprint(&blob) != manifest.vectors_sha256 {
            return Err(ChatError::Index(format!(
                "{} does not match its manifest checksum",
                VECTORS_FILE
            )));
        }
        let expected = manifest.entries.len() * manifest.dims * 4;
        if blob.len() != expected {
            return Err(ChatError::Index(format!(
                "{} holds {} bytes, expected {}",
                VECTORS_FILE,
                blob.len(),
                expected
            )));
        }

        let vectors: Vec<Vec<f32>> = if manifest.dims == 0 {
            vec![Vec::new(); manifest.entries.len()]
        } else {
            blob.chunks_exact(manifest.dims * 4).map(blob_to_vec).collect()
        };
        Self::build(manifest.model, manifest.dims, manifest.entries, vectors)
    }

    /// True when `dir` contains a persisted index manifest.
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }
}

fn dimension_mismatch(expected: usize, actual: usize) -> ChatError {
    ChatError::Configuration(format!(
        "embedding dimension mismatch: index uses {} dims, got {}",
        expected, actual
    ))
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use libre_chat_core::index::{blob_to_vec, vec_to_blob};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes written by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::META_SOURCE;

    fn chunk(text: &str, source: &str) -> Chunk {
        let mut metadata = Metadata::new();
        metadata.insert(META_SOURCE.to_string(), source.to_string());
        Chunk {
            text: text.to_string(),
            metadata,
        }
    }

    fn sample() -> VectorIndex {
        VectorIndex::build(
            "test-model",
            3,
            vec![
                chunk("x axis", "x.txt"),
                chunk("y axis", "y.txt"),
                chunk("diagonal", "xy.txt"),
            ],
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![1.0, 1.0, 0.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn cosine_identical_orthogonal_opposite() {
        let v = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn search_orders_by_descending_score() {
        let index = sample();
        let hits = index.search(&[1.0, 0.1, 0.0], 3, None).unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.entry.text.as_str()).collect();
        assert_eq!(texts, vec!["x axis", "diagonal", "y axis"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn search_respects_k_and_threshold() {
        let index = sample();
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 1, None).unwrap().len(), 1);

        let hits = index.search(&[1.0, 0.0, 0.0], 4, Some(0.5)).unwrap();
        assert_eq!(hits.len(), 2);

        let none = index.search(&[1.0, 0.0, 0.0], 4, Some(1.01)).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let err = sample().search(&[1.0, 0.0], 2, None).unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn build_rejects_mismatched_inputs() {
        let err = VectorIndex::build("m", 2, vec![chunk("a", "a")], vec![]).unwrap_err();
        assert!(matches!(err, ChatError::Index(_)));

        let err =
            VectorIndex::build("m", 2, vec![chunk("a", "a")], vec![vec![1.0, 2.0, 3.0]])
                .unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[test]
    fn save_and_load_preserve_entries() {
        let dir = std::env::temp_dir().join(format!(
            "libre-chat-index-test-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);

        let index = sample();
        index.save(&dir).unwrap();
        assert!(VectorIndex::exists(&dir));

        let loaded = VectorIndex::load(&dir).unwrap();
        assert_eq!(loaded, index);

        fs::write(dir.join(VECTORS_FILE), [0u8; 4]).unwrap();
        assert!(matches!(VectorIndex::load(&dir), Err(ChatError::Index(_))));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
