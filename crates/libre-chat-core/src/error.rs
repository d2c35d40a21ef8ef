//! Error taxonomy shared by every Libre Chat component.
//!
//! Only [`ChatError::EmptyPrompt`] and [`ChatError::Configuration`] are
//! expected to reach end users verbatim. Load failures are recovered per file
//! by the loader registry, and download failures are logged and skipped, so
//! those variants mostly show up in reports and logs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by ingestion, indexing, and query operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid settings: zero prompt variables, embedding dimension mismatch,
    /// `chunk_overlap >= chunk_size`, unknown provider. Fatal at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller sent an empty prompt.
    #[error("Provide a prompt")]
    EmptyPrompt,

    /// A document could not be parsed by its loader.
    #[error("failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// The embedding provider failed for a whole batch.
    #[error("embedding failed ({provider}): {message}")]
    Embedding { provider: String, message: String },

    /// Reading, writing, or decoding a persisted vector index failed.
    #[error("vector index error: {0}")]
    Index(String),

    /// The language model backend failed while generating.
    #[error("model error: {0}")]
    Model(String),

    /// The streaming worker terminated abnormally.
    #[error("streaming worker failed: {0}")]
    Streaming(String),

    /// An artifact download failed.
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChatError {
    pub fn load(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        ChatError::Load {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn embedding(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ChatError::Embedding {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Configuration(_) => "configuration",
            ChatError::EmptyPrompt => "empty_prompt",
            ChatError::Load { .. } => "load_error",
            ChatError::Embedding { .. } => "embedding_error",
            ChatError::Index(_) => "index_error",
            ChatError::Model(_) => "model_error",
            ChatError::Streaming(_) => "streaming_error",
            ChatError::Download { .. } => "download_error",
            ChatError::Io(_) => "io_error",
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
