//! # Libre Chat
//!
//! A chat service backed by a local large language model, optionally
//! augmented with retrieval over your own documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Documents  │──▶│  Pipeline   │──▶│ Vector index │
//! │ PDF/CSV/... │   │ Chunk+Embed │   │ index.json + │
//! └─────────────┘   └─────────────┘   │ vectors.bin  │
//!                                     └──────┬───────┘
//!                                            ▼
//!                 ┌──────────┐       ┌──────────────┐       ┌─────────┐
//!                 │ HTTP/WS  │──────▶│ Query engine │──────▶│   LLM   │
//!                 │   CLI    │◀──────│  + streaming │◀──────│ backend │
//!                 └──────────┘       └──────────────┘       └─────────┘
//! ```
//!
//! Without `vector.vector_path` the engine runs in conversational mode and
//! the document pipeline is unused.
//!
//! ## Quick Start
//!
//! ```bash
//! libre-chat download            # fetch configured artifacts
//! libre-chat build               # vectorize ./documents
//! libre-chat query "What is the capital of the Netherlands?"
//! libre-chat start               # serve HTTP + WebSocket
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`extract`] | Text extraction from binary and markup formats |
//! | [`loaders`] | Glob → loader registry producing document records |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vectorstore`] | Vector index lifecycle |
//! | [`ingest`] | Load → chunk → embed → index pipeline |
//! | [`llm`] | Language model backends |
//! | [`streaming`] | Blocking generation to async token stream bridge |
//! | [`engine`] | Conversational and retrieval query dispatch |
//! | [`download`] | Artifact download and unzip |
//! | [`server`] | HTTP and WebSocket server |
//!
//! Documents, chunking, prompts, memory and the flat index itself live in
//! the [`libre_chat_core`] crate.

pub mod config;
pub mod download;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod loaders;
pub mod server;
pub mod streaming;
pub mod vectorstore;
