//! Recursive character text splitter.
//!
//! Splits [`DocumentRecord`] text into [`Chunk`]s of at most `chunk_size`
//! characters, preferring the largest semantic unit that fits.
//!
//! # Algorithm
//!
//! 1. Pick the first separator of `["\n\n", "\n", ". ", " ", ""]` that occurs
//!    in the text (`""` means "split into characters").
//! 2. Split on it, keeping the separator at the start of the following piece.
//! 3. Pieces shorter than `chunk_size` are buffered; longer ones first flush
//!    the buffer, then are split recursively with the remaining separators.
//! 4. Buffered pieces are merged greedily up to `chunk_size`. When a chunk is
//!    emitted, pieces are dropped from the front of the window until at most
//!    `chunk_overlap` characters remain, so the next chunk starts with the
//!    tail of the previous one.
//! 5. Chunks are whitespace-trimmed and empty ones dropped.
//!
//! Lengths are counted in Unicode scalar values, never bytes, so slicing is
//! always on character boundaries.
//!
//! # Example
//!
//! ```rust
//! use libre_chat_core::chunk::RecursiveSplitter;
//!
//! let splitter = RecursiveSplitter::new(20, 5).unwrap();
//! let chunks = splitter.split_text("First paragraph.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["First paragraph.", "Second paragraph."]);
//! ```

use std::collections::VecDeque;

use crate::error::{ChatError, Result};
use crate::models::{Chunk, DocumentRecord, META_CHUNK_INDEX};

/// Separators tried in order: paragraph, line, sentence, word, character.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Splits text hierarchically with a fixed size limit and overlap.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    /// Create a splitter.
    ///
    /// # Errors
    ///
    /// [`ChatError::Configuration`] unless `chunk_size > 0` and
    /// `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ChatError::Configuration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(ChatError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split one text into chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    /// Split records into chunks carrying the record metadata plus `chunk_index`.
    ///
    /// `chunk_index` restarts at 0 for every record.
    pub fn split_documents(&self, records: &[DocumentRecord]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for record in records {
            let base = record.metadata();
            for (i, text) in self.split_text(&record.raw_text).into_iter().enumerate() {
                let mut metadata = base.clone();
                metadata.insert(META_CHUNK_INDEX.to_string(), i.to_string());
                chunks.push(Chunk { text, metadata });
            }
        }
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut finished = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                finished.extend(self.merge(&pending));
                pending.clear();
            }
            if remaining.is_empty() {
                finished.push(piece.to_string());
            } else {
                finished.extend(self.split_recursive(piece, remaining));
            }
        }
        if !pending.is_empty() {
            finished.extend(self.merge(&pending));
        }
        finished
    }

    /// Greedily merge pieces into windows of at most `chunk_size` characters.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut out, &window);
                while total > self.chunk_overlap
                    || (total > 0 && total + len > self.chunk_size)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }
        push_trimmed(&mut out, &window);
        out
    }
}

/// Split `records` with a fresh [`RecursiveSplitter`].
pub fn split_documents(
    records: &[DocumentRecord],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>> {
    Ok(RecursiveSplitter::new(chunk_size, chunk_overlap)?.split_documents(records))
}

fn push_trimmed(out: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(p, _)| *p).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on `separator`, attaching each separator to the start of the piece
/// that follows it. An empty separator splits into single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}
