//! Configuration loading, environment overrides and validation.
//!
//! Libre Chat is configured from a TOML file (default `chat.toml`). Every
//! field has a default, so a missing file or a partial one is valid:
//!
//! ```toml
//! [info]
//! title = "Libre Chat"
//! workers = 4
//!
//! [llm]
//! backend = "ollama"              # or "openai-compatible"
//! model = "llama3.2"
//! url = "http://localhost:11434"
//! max_new_tokens = 256
//! temperature = 0.01
//!
//! [vector]
//! vector_path = "vectorstore/db"  # unset = conversational mode
//! documents_path = "documents/"
//! chunk_size = 500
//! chunk_overlap = 50
//! return_sources_count = 4
//!
//! [embedding]
//! provider = "local"              # local | ollama | openai | hash
//! model = "sentence-transformers/all-MiniLM-L6-v2"
//! dims = 384
//!
//! [prompt]
//! variables = ["input", "history"]
//! template = ""                   # empty = default template for the mode
//!
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [auth]
//! admin_pass = "change-me"
//! ```
//!
//! Environment variables override the file: `LIBRECHAT_ADMIN_PASS`,
//! `LIBRECHAT_VECTOR_PATH` and `LIBRECHAT_LLM_URL`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use libre_chat_core::prompt::{PromptSpec, CONVERSATION_VARIABLES};
use libre_chat_core::ChatError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::loaders::LoaderSpec;

pub const DEFAULT_CONFIG_PATH: &str = "chat.toml";

pub const ENV_ADMIN_PASS: &str = "LIBRECHAT_ADMIN_PASS";
pub const ENV_VECTOR_PATH: &str = "LIBRECHAT_VECTOR_PATH";
pub const ENV_LLM_URL: &str = "LIBRECHAT_LLM_URL";

pub const EMBEDDING_PROVIDERS: [&str; 4] = ["local", "ollama", "openai", "hash"];
pub const LLM_BACKENDS: [&str; 2] = ["ollama", "openai-compatible"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub info: InfoConfig,
    pub llm: LlmConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub prompt: PromptConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_examples")]
    pub examples: Vec<String>,
    /// Worker threads for artifact downloads.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            version: default_version(),
            description: default_description(),
            examples: default_examples(),
            workers: default_workers(),
        }
    }
}

fn default_title() -> String {
    "Libre Chat".to_string()
}
fn default_version() -> String {
    "0.1.0".to_string()
}
fn default_description() -> String {
    "Open source and free chatbot powered by a local LLM".to_string()
}
fn default_examples() -> Vec<String> {
    vec![
        "What is the capital of the Netherlands?".to_string(),
        "Which drugs are approved by the FDA to mitigate Alzheimer symptoms?".to_string(),
    ]
}
fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `ollama` or `openai-compatible` (llama.cpp server, vLLM, ...).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    /// Where a downloaded model file is stored (see `model_download`).
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub model_download: Option<String>,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_llm_model(),
            url: default_llm_url(),
            model_path: None,
            model_download: None,
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            api_key: None,
        }
    }
}

fn default_backend() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3.2".to_string()
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_max_new_tokens() -> u32 {
    256
}
fn default_temperature() -> f32 {
    0.01
}
fn default_llm_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Directory of the persisted index. Unset selects conversational mode.
    #[serde(default)]
    pub vector_path: Option<PathBuf>,
    #[serde(default)]
    pub vector_download: Option<String>,
    #[serde(default = "default_documents_path")]
    pub documents_path: PathBuf,
    #[serde(default)]
    pub documents_download: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_return_sources_count")]
    pub return_sources_count: usize,
    /// Minimum cosine similarity in `[0, 1]` for a chunk to be retrieved.
    #[serde(default)]
    pub score_threshold: Option<f32>,
    /// Loader table; unset uses the built-in table.
    #[serde(default)]
    pub document_loaders: Option<Vec<LoaderSpec>>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            vector_path: None,
            vector_download: None,
            documents_path: default_documents_path(),
            documents_download: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            return_sources_count: default_return_sources_count(),
            score_threshold: None,
            document_loaders: None,
        }
    }
}

fn default_documents_path() -> PathBuf {
    PathBuf::from("documents/")
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_return_sources_count() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for the `ollama` and `openai` providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Local model cache directory for the `local` provider.
    #[serde(default)]
    pub embeddings_path: Option<PathBuf>,
    #[serde(default)]
    pub embeddings_download: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            embeddings_path: None,
            embeddings_download: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_variables")]
    pub variables: Vec<String>,
    /// Empty selects the default template for the engine mode.
    #[serde(default)]
    pub template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            variables: default_prompt_variables(),
            template: String::new(),
        }
    }
}

fn default_prompt_variables() -> Vec<String> {
    CONVERSATION_VARIABLES.iter().map(|v| v.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing)]
    pub admin_pass: Option<String>,
}

impl Config {
    /// Parse TOML text, apply no environment overrides, and validate.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieval mode is selected by the presence of `vector.vector_path`.
    pub fn is_retrieval(&self) -> bool {
        self.vector.vector_path.is_some()
    }

    /// Apply `LIBRECHAT_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pass) = lookup(ENV_ADMIN_PASS) {
            self.auth.admin_pass = Some(pass);
        }
        if let Some(path) = lookup(ENV_VECTOR_PATH) {
            self.vector.vector_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(url) = lookup(ENV_LLM_URL) {
            self.llm.url = url;
        }
    }

    /// The prompt used by the engine for this configuration's mode.
    ///
    /// An empty template selects the default conversational template, or the
    /// default question-answering template in retrieval mode.
    pub fn prompt_spec(&self) -> libre_chat_core::Result<PromptSpec> {
        if self.prompt.template.trim().is_empty() {
            return Ok(if self.is_retrieval() {
                PromptSpec::question_answering()
            } else {
                PromptSpec::conversation()
            });
        }
        PromptSpec::new(self.prompt.template.clone(), &self.prompt.variables)
    }

    pub fn validate(&self) -> libre_chat_core::Result<()> {
        let invalid = |msg: String| Err(ChatError::Configuration(msg));

        if self.vector.chunk_size == 0 {
            return invalid("vector.chunk_size must be > 0".to_string());
        }
        if self.vector.chunk_overlap >= self.vector.chunk_size {
            return invalid(format!(
                "vector.chunk_overlap ({}) must be smaller than vector.chunk_size ({})",
                self.vector.chunk_overlap, self.vector.chunk_size
            ));
        }
        if let Some(t) = self.vector.score_threshold {
            if !(0.0..=1.0).contains(&t) {
                return invalid("vector.score_threshold must be in [0.0, 1.0]".to_string());
            }
        }
        if self.info.workers == 0 {
            return invalid("info.workers must be >= 1".to_string());
        }
        if self.prompt.variables.is_empty() {
            return invalid("prompt.variables must not be empty".to_string());
        }
        if !EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return invalid(format!(
                "Unknown embedding provider: '{}'. Must be one of {}.",
                self.embedding.provider,
                EMBEDDING_PROVIDERS.join(", ")
            ));
        }
        if self.embedding.dims == 0 {
            return invalid("embedding.dims must be > 0".to_string());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be > 0".to_string());
        }
        if !LLM_BACKENDS.contains(&self.llm.backend.as_str()) {
            return invalid(format!(
                "Unknown llm backend: '{}'. Must be one of {}.",
                self.llm.backend,
                LLM_BACKENDS.join(", ")
            ));
        }
        self.prompt_spec()?;
        Ok(())
    }
}

/// Load `path`, falling back to defaults when the file does not exist, then
/// apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        info!(path = %path.display(), "Loaded config");
        config
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Config::default()
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libre_chat_core::prompt::{DEFAULT_CONVERSATION_PROMPT, DEFAULT_QA_PROMPT};
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.vector.chunk_size, 500);
        assert_eq!(config.vector.chunk_overlap, 50);
        assert_eq!(config.vector.return_sources_count, 4);
        assert_eq!(config.llm.max_new_tokens, 256);
        assert_eq!(config.info.workers, 4);
        assert!(!config.is_retrieval());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [vector]
            vector_path = "vectorstore/db"
            chunk_size = 200
            chunk_overlap = 20

            [embedding]
            provider = "hash"
            dims = 64
            "#,
        )
        .unwrap();
        assert!(config.is_retrieval());
        assert_eq!(config.vector.chunk_size, 200);
        assert_eq!(config.vector.return_sources_count, 4);
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.server.bind, "0.0.0.0:8000");
    }

    #[test]
    fn empty_template_picks_mode_default() {
        let mut config = Config::default();
        assert_eq!(config.prompt_spec().unwrap().template(), DEFAULT_CONVERSATION_PROMPT);
        config.vector.vector_path = Some(PathBuf::from("vectorstore/db"));
        let spec = config.prompt_spec().unwrap();
        assert_eq!(spec.template(), DEFAULT_QA_PROMPT);
        assert_eq!(spec.variables(), ["context", "question"]);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = Config::from_toml_str("[vector]\nchunk_size = 10\nchunk_overlap = 10\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("chunk_overlap"));
    }

    #[test]
    fn rejects_unknown_provider_and_backend() {
        assert!(Config::from_toml_str("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(Config::from_toml_str("[llm]\nbackend = \"ctransformers\"\n").is_err());
    }

    #[test]
    fn rejects_empty_prompt_variables() {
        let err = Config::from_toml_str("[prompt]\nvariables = []\n").unwrap_err();
        assert!(format!("{:#}", err).contains("variables"));
    }

    #[test]
    fn rejects_template_missing_a_variable() {
        let toml = "[prompt]\nvariables = [\"input\", \"history\"]\ntemplate = \"User: {input}\"\n";
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        assert!(Config::from_toml_str("[vector]\nscore_threshold = 1.5\n").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_ADMIN_PASS, "secret"),
            (ENV_VECTOR_PATH, "/tmp/vectors"),
            (ENV_LLM_URL, "http://llm:8080"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.auth.admin_pass.as_deref(), Some("secret"));
        assert_eq!(config.vector.vector_path, Some(PathBuf::from("/tmp/vectors")));
        assert_eq!(config.llm.url, "http://llm:8080");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.vector.documents_path, PathBuf::from("documents/"));
    }

    #[test]
    fn admin_pass_is_never_serialized() {
        let mut config = Config::default();
        config.auth.admin_pass = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
