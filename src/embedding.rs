//! Embedding providers.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`HashEmbedder`]**: offline feature hashing, deterministic, no model.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAiEmbedder`]**: the OpenAI (or compatible) `/embeddings` API.
//! - **`LocalEmbedder`**: fastembed models run in-process (feature
//!   `local-embeddings`).
//!
//! Providers are synchronous. Async callers run them on the blocking pool.
//!
//! # Batch checks
//!
//! [`embed_batch`] wraps any provider: it rejects blank inputs, slices the
//! input into `batch_size` requests and verifies that every returned vector
//! has [`Embedder::dims`] entries.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use libre_chat_core::{ChatError, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

/// A text embedding backend.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the persisted index.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per input, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in slices of `batch_size`, validating inputs and outputs.
///
/// # Errors
///
/// - [`ChatError::Embedding`] if any input is blank (the whole batch fails)
///   or the provider returns the wrong number of vectors.
/// - [`ChatError::Configuration`] if a vector's length differs from
///   [`Embedder::dims`].
pub fn embed_batch(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(ChatError::embedding(
            embedder.model_name(),
            format!("input {} of {} is empty", pos, texts.len()),
        ));
    }

    let mut vectors = Vec::with_capacity(texts.len());
    for slice in texts.chunks(batch_size.max(1)) {
        let batch = embedder.embed(slice)?;
        if batch.len() != slice.len() {
            return Err(ChatError::embedding(
                embedder.model_name(),
                format!("expected {} vectors, got {}", slice.len(), batch.len()),
            ));
        }
        for vector in &batch {
            if vector.len() != embedder.dims() {
                return Err(ChatError::Configuration(format!(
                    "embedding model '{}' returned {} dims, configured for {}",
                    embedder.model_name(),
                    vector.len(),
                    embedder.dims()
                )));
            }
        }
        vectors.extend(batch);
        debug!(done = vectors.len(), total = texts.len(), "Embedded batch");
    }
    Ok(vectors)
}

/// Embed a single query text.
pub fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embed_batch(embedder, &[text.to_string()], 1)?
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::embedding(embedder.model_name(), "empty embedding response"))
}

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"local"` | `LocalEmbedder` (needs the `local-embeddings` feature) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(ChatError::Configuration(
            "Local embedding provider requires building with --features local-embeddings"
                .to_string(),
        )),
        other => Err(ChatError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Hash Provider ============

/// Feature-hashing embedder: lowercase word tokens are hashed (SHA-256) into
/// `dims` signed buckets and the result is L2-normalized.
///
/// Texts sharing words get a positive cosine similarity, which is enough for
/// keyword-level retrieval without any model download.
pub struct HashEmbedder {
    dims: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            name: format!("feature-hash-{}", dims),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return vector;
        }
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ HTTP Providers ============

fn http_client(timeout_secs: u64, provider: &str) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ChatError::embedding(provider, e))
}

/// POST `body` as JSON with retry/backoff and return the parsed response.
fn post_with_retry(
    client: &reqwest::blocking::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    provider: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            warn!(provider, attempt, delay_secs = delay.as_secs(), "Retrying embedding request");
            std::thread::sleep(delay);
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send() {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .map_err(|e| ChatError::embedding(provider, format!("invalid JSON: {}", e)));
                }

                let body_text = response.text().unwrap_or_default();
                let err = ChatError::embedding(provider, format!("API error {}: {}", status, body_text));
                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(ChatError::embedding(
                    provider,
                    format!("connection error ({}): {}", url, e),
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ChatError::embedding(provider, "failed after retries")))
}

/// A JSON array of numbers as a vector. Any other entry is an error.
fn json_vector(provider: &str, value: &serde_json::Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| ChatError::embedding(provider, "embedding is not an array"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().map(|x| x as f32).ok_or_else(|| {
                ChatError::embedding(provider, format!("embedding entry {} is not a number: {}", i, v))
            })
        })
        .collect()
}

/// Calls `POST {url}/api/embed` on an Ollama instance (default
/// `http://localhost:11434`). The model must be pulled beforehand.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::blocking::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs, "ollama")?,
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = post_with_retry(&self.client, &url, None, &body, self.max_retries, "ollama")?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ChatError::embedding("ollama", "response is missing the embeddings array"))?
        .iter()
        .map(|e| json_vector("ollama", e))
        .collect()
}

/// Calls `POST {url}/embeddings` (default `https://api.openai.com/v1`).
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ChatError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs, "openai")?,
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let url = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let json = post_with_retry(
            &self.client,
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "openai",
        )?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ChatError::embedding("openai", "response is missing the data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .ok_or_else(|| ChatError::embedding("openai", "response item is missing embedding"))
            .and_then(|e| json_vector("openai", e))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::Mutex;

    use libre_chat_core::{ChatError, Result};

    use super::Embedder;
    use crate::config::EmbeddingConfig;

    /// In-process embeddings via fastembed. The model is downloaded from
    /// Hugging Face on first use and cached in `embeddings_path`.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Mutex<fastembed::TextEmbedding>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model = config_to_fastembed_model(&config.model)?;
            let mut options = fastembed::InitOptions::new(model).with_show_download_progress(false);
            if let Some(dir) = &config.embeddings_path {
                options = options.with_cache_dir(dir.clone());
            }
            let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
                ChatError::embedding("local", format!("failed to initialize model: {}", e))
            })?;
            Ok(Self {
                model_name: config.model.clone(),
                dims: config.dims,
                batch_size: config.batch_size,
                model: Mutex::new(model),
            })
        }
    }

    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| ChatError::embedding("local", "model lock poisoned"))?;
            model
                .embed(texts.to_vec(), Some(self.batch_size))
                .map_err(|e| ChatError::embedding("local", e))
        }
    }

    fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        let short = name.rsplit('/').next().unwrap_or(name).to_ascii_lowercase();
        match short.as_str() {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            other => Err(ChatError::Configuration(format!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
                other
            ))),
        }
    }
}
