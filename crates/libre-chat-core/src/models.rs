//! Core data models used throughout Libre Chat.
//!
//! These types represent the documents, chunks, and query results that flow
//! through the ingestion and retrieval pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Provenance metadata attached to records, chunks, and index entries.
///
/// A `BTreeMap` keeps serialization order stable, which keeps persisted
/// indexes byte-for-byte reproducible.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the originating file path.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the page / part number of a multi-part source.
pub const META_PAGE: &str = "page";
/// Metadata key holding a chunk's position within its record.
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Metadata key added to retrieved sources for display.
pub const META_FILENAME: &str = "filename";

/// Raw text extracted from one file, or one page / row / note of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub source_path: PathBuf,
    pub raw_text: String,
    pub page_or_part: Option<u32>,
    pub extra_metadata: Metadata,
}

impl DocumentRecord {
    pub fn new(source_path: impl Into<PathBuf>, raw_text: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            raw_text: raw_text.into(),
            page_or_part: None,
            extra_metadata: Metadata::new(),
        }
    }

    pub fn with_part(mut self, part: u32) -> Self {
        self.page_or_part = Some(part);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_metadata.insert(key.into(), value.into());
        self
    }

    /// Flattened metadata: extras, then `source` and `page` (which win on conflict).
    pub fn metadata(&self) -> Metadata {
        let mut meta = self.extra_metadata.clone();
        meta.insert(
            META_SOURCE.to_string(),
            self.source_path.to_string_lossy().into_owned(),
        );
        if let Some(part) = self.page_or_part {
            meta.insert(META_PAGE.to_string(), part.to_string());
        }
        meta
    }
}

/// A bounded piece of a record's text, the unit that gets embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

/// A retrieved passage returned alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(rename = "page_content")]
    pub text: String,
    pub metadata: Metadata,
}

impl SourceDocument {
    /// Build a display source, adding `filename` (basename of `source`).
    pub fn annotated(text: String, mut metadata: Metadata) -> Self {
        let filename = metadata.get(META_SOURCE).and_then(|source| {
            Path::new(source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        });
        if let Some(name) = filename {
            metadata.insert(META_FILENAME.to_string(), name);
        }
        Self { text, metadata }
    }
}

/// The normalized outcome of a query in either mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(rename = "result")]
    pub result_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Vec<SourceDocument>>,
}

impl QueryResult {
    pub fn text(result_text: impl Into<String>) -> Self {
        Self {
            result_text: result_text.into(),
            source_documents: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_metadata_includes_source_and_page() {
        let rec = DocumentRecord::new("docs/report.pdf", "text")
            .with_part(3)
            .with_meta("author", "ops");
        let meta = rec.metadata();
        assert_eq!(meta[META_SOURCE], "docs/report.pdf");
        assert_eq!(meta[META_PAGE], "3");
        assert_eq!(meta["author"], "ops");
    }

    #[test]
    fn annotated_source_gets_filename() {
        let mut meta = Metadata::new();
        meta.insert(META_SOURCE.into(), "documents/sub/amsterdam.txt".into());
        let src = SourceDocument::annotated("Amsterdam".into(), meta);
        assert_eq!(src.metadata[META_FILENAME], "amsterdam.txt");
    }

    #[test]
    fn query_result_serializes_like_the_http_contract() {
        let json = serde_json::to_value(QueryResult::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "result": "hi" }));
    }
}
