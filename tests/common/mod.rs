#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use libre_chat::config::Config;
use libre_chat::embedding::{Embedder, HashEmbedder};
use libre_chat::engine::QueryEngine;
use libre_chat::llm::{GenerationParams, LanguageModel};
use libre_chat_core::Result;

pub const DIMS: usize = 256;

/// Answers from the rendered prompt alone, one word per token.
///
/// A prompt mentioning Amsterdam (through retrieved context) gets a fixed
/// answer; anything else gets the last user input or question echoed back.
pub struct EchoModel;

impl EchoModel {
    pub fn answer_for(prompt: &str) -> String {
        if prompt.contains("Amsterdam") {
            return "Amsterdam is the capital of the Netherlands.".to_string();
        }
        let last = prompt
            .lines()
            .rev()
            .find_map(|line| {
                line.strip_prefix("User: ")
                    .or_else(|| line.strip_prefix("Question: "))
            })
            .unwrap_or("nothing");
        format!("You said: {}", last)
    }
}

impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let answer = Self::answer_for(prompt);
        for token in answer.split_inclusive(' ') {
            on_token(token);
        }
        Ok(answer)
    }
}

/// Hash embedder that counts how many texts it embedded.
pub struct CountingEmbedder {
    inner: HashEmbedder,
    pub embedded: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashEmbedder::new(DIMS),
            embedded: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed(texts)
    }
}

pub fn conversational_config() -> Config {
    Config::default()
}

/// Retrieval config rooted at `root`: documents in `root/documents`, index
/// in `root/vectorstore/db`, offline hash embeddings.
pub fn retrieval_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.vector.vector_path = Some(root.join("vectorstore").join("db"));
    config.vector.documents_path = root.join("documents");
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = DIMS;
    config
}

pub fn write_corpus(documents: &Path) {
    std::fs::create_dir_all(documents).unwrap();
    std::fs::write(
        documents.join("amsterdam.txt"),
        "Amsterdam is the capital of the Netherlands.",
    )
    .unwrap();
    std::fs::write(
        documents.join("bananas.md"),
        "# Fruit\n\nBananas are yellow fruits rich in potassium.",
    )
    .unwrap();
    std::fs::write(
        documents.join("compilers.txt"),
        "Rust programs compile to native machine code.",
    )
    .unwrap();
}

pub fn engine(config: Config, embedder: Option<Arc<dyn Embedder>>) -> QueryEngine {
    QueryEngine::with_components(config, Arc::new(EchoModel), embedder).unwrap()
}
