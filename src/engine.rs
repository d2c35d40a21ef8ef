//! Query engine: prompt dispatch in conversational or retrieval mode.
//!
//! The mode is fixed when the engine is created:
//!
//! - **Conversational** (no `vector.vector_path`): the prompt is rendered
//!   with the session's [`ConversationMemory`] as `history` and the user
//!   prompt as `input`. The exchange is appended to the memory.
//! - **Retrieval**: the prompt is embedded, the closest chunks are fetched
//!   from the vector index and rendered as `context` next to the `question`.
//!   The result lists the chunks used as sources. Memory is not used.
//!
//! Three call surfaces share the same dispatch: [`QueryEngine::query`]
//! blocks, [`QueryEngine::aquery`] runs on the tokio blocking pool and
//! [`QueryEngine::stream`] yields tokens through a
//! [`StreamingBridge`](crate::streaming::StreamingBridge).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use libre_chat_core::index::VectorIndex;
use libre_chat_core::memory::ConversationMemory;
use libre_chat_core::models::{QueryResult, SourceDocument};
use libre_chat_core::prompt::PromptSpec;
use libre_chat_core::{ChatError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::ingest::{build_vectorstore, IngestReport};
use crate::llm::{create_model, GenerationParams, LanguageModel};
use crate::streaming::{StreamingBridge, TokenStream, DEFAULT_CAPACITY, DEFAULT_POLL_INTERVAL};
use crate::vectorstore::{IndexState, VectorIndexManager};

/// Neighbours used to build the context when `return_sources_count` is 0.
pub const DEFAULT_CONTEXT_SOURCES: usize = 4;

/// Answer returned in retrieval mode while no index is available.
pub const INDEX_NOT_BUILT_MESSAGE: &str = "The vector index has not been built, please run \
`libre-chat build` or upload documents through POST /documents to vectorize them.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Conversational,
    Retrieval,
}

/// Per-call adjustments to the configured prompt and sampling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOverrides {
    /// Replaces the conversational template for this call.
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_new_tokens: Option<u32>,
}

/// Final item of a [`QueryEngine::stream`].
#[derive(Debug, Clone)]
pub struct StreamedAnswer {
    pub result: QueryResult,
    /// The history passed to `stream`, with this exchange appended in
    /// conversational mode.
    pub memory: ConversationMemory,
}

/// Cheap to clone; clones share the model, embedder and index.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Config,
    mode: Mode,
    model: Arc<dyn LanguageModel>,
    embedder: Option<Arc<dyn Embedder>>,
    index: RwLock<Option<VectorIndexManager>>,
    /// Serializes index builds. Queries keep reading the previous index.
    build_lock: Mutex<()>,
}

impl QueryEngine {
    /// Create the model and, in retrieval mode, the embedder from `config`
    /// and open the persisted index if there is one.
    pub fn new(config: Config) -> Result<Self> {
        let model = create_model(&config.llm)?;
        let embedder = if config.is_retrieval() {
            Some(create_embedder(&config.embedding)?)
        } else {
            None
        };
        Self::with_components(config, model, embedder)
    }

    /// Create an engine around existing components.
    ///
    /// # Errors
    ///
    /// [`ChatError::Configuration`] if the configuration is invalid or the
    /// engine is in retrieval mode without an embedder. A persisted index
    /// that cannot be loaded is logged and left `Absent` until rebuilt.
    pub fn with_components(
        config: Config,
        model: Arc<dyn LanguageModel>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        config.validate()?;
        let mode = if config.is_retrieval() {
            Mode::Retrieval
        } else {
            Mode::Conversational
        };

        let index = match (&config.vector.vector_path, &embedder) {
            (Some(path), Some(embedder)) => {
                let (model, dims) = (embedder.model_name(), embedder.dims());
                match VectorIndexManager::open(path, model, dims) {
                    Ok(manager) => Some(manager),
                    Err(err) => {
                        // A forced rebuild replaces the unreadable index.
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "Cannot load the vector index, starting without it"
                        );
                        Some(VectorIndexManager::unloaded(path, model, dims))
                    }
                }
            }
            (Some(_), None) => {
                return Err(ChatError::Configuration(
                    "retrieval mode requires an embedder".to_string(),
                ))
            }
            (None, _) => None,
        };

        info!(mode = ?mode, model = model.name(), "Query engine ready");
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                mode,
                model,
                embedder,
                index: RwLock::new(index),
                build_lock: Mutex::new(()),
            }),
        })
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn documents_path(&self) -> &Path {
        &self.inner.config.vector.documents_path
    }

    /// Index state, or `None` in conversational mode.
    pub fn index_state(&self) -> Result<Option<IndexState>> {
        Ok(self.inner.read_index()?.as_ref().map(|m| m.state()))
    }

    pub fn has_index(&self) -> bool {
        matches!(self.index_state(), Ok(Some(IndexState::Built)))
    }

    /// Answer `prompt` on the calling thread.
    ///
    /// In conversational mode the exchange is appended to `memory`.
    pub fn query(
        &self,
        prompt: &str,
        memory: Option<&mut ConversationMemory>,
        overrides: Option<&QueryOverrides>,
    ) -> Result<QueryResult> {
        self.inner.answer(prompt, memory, overrides, &mut |_| {})
    }

    /// Same as [`query`](Self::query), with the embedding and generation
    /// calls moved to the blocking pool.
    pub async fn aquery(
        &self,
        prompt: &str,
        memory: Option<&mut ConversationMemory>,
        overrides: Option<&QueryOverrides>,
    ) -> Result<QueryResult> {
        check_prompt(prompt)?;
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        let overrides = overrides.cloned();
        let mut session = memory.as_deref().cloned();

        let (result, session) = tokio::task::spawn_blocking(move || {
            let result = inner.answer(&prompt, session.as_mut(), overrides.as_ref(), &mut |_| {});
            (result, session)
        })
        .await
        .map_err(|e| ChatError::Model(format!("query task failed: {}", e)))?;

        if let (Some(memory), Some(updated)) = (memory, session) {
            *memory = updated;
        }
        result
    }

    /// Answer `prompt` token by token.
    ///
    /// The stream ends with a [`StreamedAnswer`] carrying the full result and
    /// the updated `history`.
    pub fn stream(
        &self,
        prompt: &str,
        history: Option<ConversationMemory>,
        overrides: Option<&QueryOverrides>,
    ) -> Result<TokenStream<StreamedAnswer>> {
        check_prompt(prompt)?;
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        let overrides = overrides.cloned();
        let mut memory = history.unwrap_or_default();

        Ok(StreamingBridge::spawn(
            DEFAULT_CAPACITY,
            DEFAULT_POLL_INTERVAL,
            move |sink| {
                let result = inner.answer(
                    &prompt,
                    Some(&mut memory),
                    overrides.as_ref(),
                    &mut |token| sink.push(token),
                )?;
                Ok(StreamedAnswer { result, memory })
            },
        ))
    }

    /// Build the vector index from `documents_path` (default
    /// `vector.documents_path`), reusing an existing index unless `force`.
    ///
    /// Blocks while documents are loaded and embedded.
    pub fn build_index(&self, documents_path: Option<&Path>, force: bool) -> Result<IngestReport> {
        let embedder = self.inner.retrieval_embedder()?;
        let _building = self
            .inner
            .build_lock
            .lock()
            .map_err(|_| ChatError::Index("index build lock poisoned".to_string()))?;
        let (manager, report) =
            build_vectorstore(&self.inner.config, embedder.as_ref(), documents_path, force)?;
        *self.inner.write_index()? = Some(manager);
        Ok(report)
    }

    /// Discard the index and build it again from the documents directory.
    pub fn rebuild_index(&self) -> Result<IngestReport> {
        self.build_index(None, true)
    }

    /// Re-read the persisted index from disk.
    pub fn reload_index(&self) -> Result<()> {
        let mut slot = self.inner.write_index()?;
        match slot.as_mut() {
            Some(manager) => manager.reload(),
            None => Err(ChatError::Configuration(
                "no vector index in conversational mode".to_string(),
            )),
        }
    }

    /// Where the index lives, if the engine is in retrieval mode.
    pub fn vector_path(&self) -> Option<PathBuf> {
        self.inner.config.vector.vector_path.clone()
    }
}

/// Only the empty string is rejected; whitespace is a valid prompt.
fn check_prompt(prompt: &str) -> Result<()> {
    if prompt.is_empty() {
        return Err(ChatError::EmptyPrompt);
    }
    Ok(())
}

impl EngineInner {
    fn read_index(&self) -> Result<RwLockReadGuard<'_, Option<VectorIndexManager>>> {
        self.index
            .read()
            .map_err(|_| ChatError::Index("vector index lock poisoned".to_string()))
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, Option<VectorIndexManager>>> {
        self.index
            .write()
            .map_err(|_| ChatError::Index("vector index lock poisoned".to_string()))
    }

    fn retrieval_embedder(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder.as_ref().ok_or_else(|| {
            ChatError::Configuration(
                "set vector.vector_path to enable the vector index".to_string(),
            )
        })
    }

    fn snapshot(&self) -> Result<Option<Arc<VectorIndex>>> {
        Ok(self.read_index()?.as_ref().and_then(|m| m.snapshot()))
    }

    fn params(&self, overrides: Option<&QueryOverrides>) -> GenerationParams {
        let mut params = GenerationParams::from(&self.config.llm);
        if let Some(o) = overrides {
            if let Some(t) = o.temperature {
                params.temperature = t;
            }
            if let Some(n) = o.max_new_tokens {
                params.max_new_tokens = n;
            }
        }
        params
    }

    fn answer(
        &self,
        prompt: &str,
        memory: Option<&mut ConversationMemory>,
        overrides: Option<&QueryOverrides>,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<QueryResult> {
        check_prompt(prompt)?;
        match self.mode {
            Mode::Conversational => self.converse(prompt, memory, overrides, on_token),
            Mode::Retrieval => self.retrieve(prompt, overrides, on_token),
        }
    }

    fn converse(
        &self,
        prompt: &str,
        memory: Option<&mut ConversationMemory>,
        overrides: Option<&QueryOverrides>,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<QueryResult> {
        let spec = match overrides
            .and_then(|o| o.instructions.as_deref())
            .filter(|t| !t.trim().is_empty())
        {
            Some(instructions) => PromptSpec::new(instructions, &self.config.prompt.variables)?,
            None => self.config.prompt_spec()?,
        };
        let history = memory.as_deref().map(|m| m.buffer()).unwrap_or_default();
        let rendered = spec.render(&[
            ("input", prompt),
            ("history", &history),
            ("question", prompt),
            ("context", ""),
        ])?;

        let answer = self
            .model
            .generate(&rendered, &self.params(overrides), on_token)?;
        if let Some(memory) = memory {
            memory.record_exchange(prompt, &answer);
        }
        Ok(QueryResult::text(answer))
    }

    fn retrieve(
        &self,
        prompt: &str,
        overrides: Option<&QueryOverrides>,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<QueryResult> {
        let Some(index) = self.snapshot()? else {
            info!("Vector index has not been built, returning notice");
            on_token(INDEX_NOT_BUILT_MESSAGE);
            return Ok(QueryResult::text(INDEX_NOT_BUILT_MESSAGE));
        };
        let embedder = self.retrieval_embedder()?;

        let wanted = self.config.vector.return_sources_count;
        let k = if wanted == 0 { DEFAULT_CONTEXT_SOURCES } else { wanted };
        // Blank text cannot be embedded; a whitespace prompt gets no context.
        let hits = if prompt.trim().is_empty() {
            Vec::new()
        } else {
            let query_vector = embed_query(embedder.as_ref(), prompt)?;
            index.search(&query_vector, k, self.config.vector.score_threshold)?
        };
        debug!(k, hits = hits.len(), "Retrieved context");

        let context = hits
            .iter()
            .map(|hit| hit.entry.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let rendered = self.config.prompt_spec()?.render(&[
            ("context", &context),
            ("question", prompt),
            ("input", prompt),
            ("history", ""),
        ])?;
        let answer = self
            .model
            .generate(&rendered, &self.params(overrides), on_token)?;

        let source_documents = (wanted > 0).then(|| {
            hits.iter()
                .map(|hit| {
                    SourceDocument::annotated(hit.entry.text.clone(), hit.entry.metadata.clone())
                })
                .collect()
        });
        Ok(QueryResult {
            result_text: answer,
            source_documents,
        })
    }
}
