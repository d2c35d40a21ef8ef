//! # Libre Chat Core
//!
//! Pure building blocks for the Libre Chat retrieval-augmented chat engine.
//!
//! This crate has no network, model runtime or async dependencies. It holds
//! the data types and algorithms shared by the ingestion pipeline and the
//! query engine:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | [`ChatError`] taxonomy and the crate `Result` alias |
//! | [`models`] | Document records, chunks, sources and query results |
//! | [`chunk`] | Recursive character splitter with overlap |
//! | [`index`] | Flat vector index, cosine search and on-disk format |
//! | [`prompt`] | Validated `{name}` prompt templates and the default prompts |
//! | [`memory`] | Per-session conversation memory |

pub mod chunk;
pub mod error;
pub mod index;
pub mod memory;
pub mod models;
pub mod prompt;

pub use error::{ChatError, Result};
