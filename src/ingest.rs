//! Ingestion pipeline orchestration.
//!
//! Coordinates the build flow: loader registry → chunker → embedder →
//! vector index. Runs on the calling thread; async callers wrap it in
//! `spawn_blocking`.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use libre_chat_core::chunk::RecursiveSplitter;
use libre_chat_core::{ChatError, Result};
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::embedding::{embed_batch, Embedder};
use crate::loaders::{LoaderRegistry, SkippedFile};
use crate::vectorstore::{IndexState, VectorIndexManager};

/// Summary of one [`build_vectorstore`] run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// True when an existing index was reused without re-embedding.
    pub reused: bool,
    pub files_loaded: usize,
    pub skipped: Vec<SkippedFile>,
    pub records: usize,
    pub chunks: usize,
    pub state: IndexState,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

impl IngestReport {
    /// Plain text summary printed by `libre-chat build`.
    pub fn print(&self) {
        println!("build vectorstore");
        if self.reused {
            println!("  reused existing index: {} entries", self.chunks);
        } else {
            println!("  files loaded: {}", self.files_loaded);
            println!("  files skipped: {}", self.skipped.len());
            for skipped in &self.skipped {
                println!("    {}: {}", skipped.path.display(), skipped.reason);
            }
            println!("  records: {}", self.records);
            println!("  chunks embedded: {}", self.chunks);
        }
        println!("  state: {:?}", self.state);
        println!("  elapsed: {} ms", self.elapsed.as_millis());
        println!("ok");
    }
}

/// Build (or reuse) the vector index configured in `vector.vector_path`.
///
/// An existing index is reused as-is unless `force` is set. Documents are read
/// from `documents_path`, defaulting to `vector.documents_path`.
///
/// # Errors
///
/// [`ChatError::Configuration`] when no `vector_path` is configured, plus any
/// embedding or index error. Files that fail to load are skipped, not errors.
pub fn build_vectorstore(
    config: &Config,
    embedder: &dyn Embedder,
    documents_path: Option<&Path>,
    force: bool,
) -> Result<(VectorIndexManager, IngestReport)> {
    let started = Instant::now();
    let vector_path = config.vector.vector_path.as_ref().ok_or_else(|| {
        ChatError::Configuration("vector.vector_path is not set".to_string())
    })?;

    let mut manager = if force {
        // Cleared without decoding: the old files may be corrupt or come from
        // another embedding model.
        let mut manager =
            VectorIndexManager::unloaded(vector_path, embedder.model_name(), embedder.dims());
        manager.begin_rebuild()?;
        manager
    } else {
        VectorIndexManager::open(vector_path, embedder.model_name(), embedder.dims())?
    };
    if manager.is_built() {
        let entries = manager.snapshot().map_or(0, |index| index.len());
        info!(path = %vector_path.display(), entries, "Reusing existing vector index, skip building");
        let report = IngestReport {
            reused: true,
            files_loaded: 0,
            skipped: Vec::new(),
            records: 0,
            chunks: entries,
            state: manager.state(),
            elapsed: started.elapsed(),
            finished_at: Utc::now(),
        };
        return Ok((manager, report));
    }

    let documents_path = documents_path.unwrap_or(config.vector.documents_path.as_path());
    let splitter = RecursiveSplitter::new(config.vector.chunk_size, config.vector.chunk_overlap)?;
    let registry = LoaderRegistry::from_config(config.vector.document_loaders.as_deref())?;

    let loaded = registry.load_directory(documents_path)?;
    let chunks = splitter.split_documents(&loaded.records);
    info!(
        documents = %documents_path.display(),
        records = loaded.records.len(),
        chunks = chunks.len(),
        "Split documents"
    );

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = if texts.is_empty() {
        Vec::new()
    } else {
        embed_batch(embedder, &texts, config.embedding.batch_size)?
    };

    let chunk_count = chunks.len();
    manager.build(chunks, vectors)?;
    manager.persist()?;

    let report = IngestReport {
        reused: false,
        files_loaded: loaded.loaded_files.len(),
        skipped: loaded.skipped,
        records: loaded.records.len(),
        chunks: chunk_count,
        state: manager.state(),
        elapsed: started.elapsed(),
        finished_at: Utc::now(),
    };
    info!(
        path = %vector_path.display(),
        chunks = report.chunks,
        skipped = report.skipped.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Vector index build finished"
    );
    Ok((manager, report))
}
