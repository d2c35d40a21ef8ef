//! Document loader registry.
//!
//! Maps file-name glob patterns to a [`LoaderKind`] and turns every matching
//! file of the documents directory into [`DocumentRecord`]s.
//!
//! # Scan rules
//!
//! - The directory is scanned **non-recursively**, once per pattern, in
//!   declaration order.
//! - Patterns match the file name only, case-insensitively.
//! - A file matched by several patterns is loaded once, by the first pattern
//!   that matched it (deduplication is by canonical path).
//! - A file that fails to load is logged and skipped. The scan continues and
//!   the [`LoadReport`] lists every skipped file with its reason.
//!
//! # Default table
//!
//! | Glob | Kind |
//! |------|------|
//! | `*.pdf` | [`LoaderKind::Pdf`], one record per page |
//! | `*.csv` / `*.tsv` / `*.psv` | [`LoaderKind::Csv`], one record per row |
//! | `*.xlsx` | [`LoaderKind::Spreadsheet`] |
//! | `*.{html,htm,xhtml}`, `*.xml` | [`LoaderKind::Html`] |
//! | `*.{json,jsonl}` | [`LoaderKind::Json`], one record per JSON Lines row |
//! | `*.{md,markdown}` | [`LoaderKind::Markdown`] |
//! | `*.txt` | [`LoaderKind::Text`] |
//! | `*.docx` | [`LoaderKind::Word`] |
//! | `*.odt` | [`LoaderKind::Odt`] |
//! | `*.pptx` | [`LoaderKind::PowerPoint`] |
//! | `*.epub` | [`LoaderKind::Epub`] |
//! | `*.eml` | [`LoaderKind::Email`] |
//! | `*.enex` | [`LoaderKind::Evernote`], one record per note |

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use libre_chat_core::models::DocumentRecord;
use libre_chat_core::{ChatError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::extract;

/// How a matched file is turned into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    Pdf,
    Csv,
    Spreadsheet,
    Html,
    Json,
    Markdown,
    Text,
    Word,
    Odt,
    #[serde(rename = "powerpoint")]
    PowerPoint,
    Epub,
    Email,
    Evernote,
}

/// One row of the loader table, as written in `[[vector.document_loaders]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderSpec {
    pub glob: String,
    pub kind: LoaderKind,
    /// Field delimiter for [`LoaderKind::Csv`] (default `,`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
}

impl LoaderSpec {
    pub fn new(glob: impl Into<String>, kind: LoaderKind) -> Self {
        Self {
            glob: glob.into(),
            kind,
            delimiter: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

pub fn default_loaders() -> Vec<LoaderSpec> {
    use LoaderKind::*;
    vec![
        LoaderSpec::new("*.pdf", Pdf),
        LoaderSpec::new("*.csv", Csv).with_delimiter(','),
        LoaderSpec::new("*.tsv", Csv).with_delimiter('\t'),
        LoaderSpec::new("*.psv", Csv).with_delimiter('|'),
        LoaderSpec::new("*.xlsx", Spreadsheet),
        LoaderSpec::new("*.{html,htm,xhtml}", Html),
        LoaderSpec::new("*.xml", Html),
        LoaderSpec::new("*.{json,jsonl}", Json),
        LoaderSpec::new("*.{md,markdown}", Markdown),
        LoaderSpec::new("*.txt", Text),
        LoaderSpec::new("*.docx", Word),
        LoaderSpec::new("*.odt", Odt),
        LoaderSpec::new("*.pptx", PowerPoint),
        LoaderSpec::new("*.epub", Epub),
        LoaderSpec::new("*.eml", Email),
        LoaderSpec::new("*.enex", Evernote),
    ]
}

/// A file the registry could not load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of [`LoaderRegistry::load_directory`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub records: Vec<DocumentRecord>,
    pub loaded_files: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
}

impl LoadReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

struct Entry {
    spec: LoaderSpec,
    matcher: GlobMatcher,
    delimiter: u8,
}

/// Ordered `(glob, kind)` table.
pub struct LoaderRegistry {
    entries: Vec<Entry>,
}

impl LoaderRegistry {
    /// # Errors
    ///
    /// [`ChatError::Configuration`] for an invalid glob or a non-ASCII CSV
    /// delimiter.
    pub fn new(specs: &[LoaderSpec]) -> Result<Self> {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let matcher = GlobBuilder::new(&spec.glob)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    ChatError::Configuration(format!("invalid loader glob '{}': {}", spec.glob, e))
                })?
                .compile_matcher();
            let delimiter = spec.delimiter.unwrap_or(',');
            let delimiter = u8::try_from(delimiter)
                .ok()
                .filter(u8::is_ascii)
                .ok_or_else(|| {
                    ChatError::Configuration(format!(
                        "CSV delimiter {:?} for '{}' must be a single ASCII character",
                        delimiter, spec.glob
                    ))
                })?;
            entries.push(Entry {
                spec: spec.clone(),
                matcher,
                delimiter,
            });
        }
        Ok(Self { entries })
    }

    /// Registry for the configured table, or the default one when unset.
    pub fn from_config(loaders: Option<&[LoaderSpec]>) -> Result<Self> {
        match loaders {
            Some(specs) => Self::new(specs),
            None => Self::new(&default_loaders()),
        }
    }

    pub fn specs(&self) -> impl Iterator<Item = &LoaderSpec> {
        self.entries.iter().map(|e| &e.spec)
    }

    /// The first spec whose glob matches the file name of `path`.
    pub fn spec_for(&self, path: &Path) -> Option<&LoaderSpec> {
        self.entry_for(path).map(|e| &e.spec)
    }

    fn entry_for(&self, path: &Path) -> Option<&Entry> {
        let name = path.file_name()?;
        self.entries.iter().find(|e| e.matcher.is_match(name))
    }

    /// Load every supported file directly inside `dir`.
    ///
    /// A missing directory yields an empty report.
    pub fn load_directory(&self, dir: &Path) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Documents directory does not exist");
            return Ok(report);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| ChatError::Io(e.into()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let mut seen: HashSet<PathBuf> = HashSet::new();
        for entry in &self.entries {
            for path in &files {
                let Some(name) = path.file_name() else {
                    continue;
                };
                if !entry.matcher.is_match(name) {
                    continue;
                }
                let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
                if !seen.insert(canonical) {
                    debug!(path = %path.display(), glob = %entry.spec.glob, "Already loaded by an earlier pattern");
                    continue;
                }
                match load_with(entry, path) {
                    Ok(records) => {
                        debug!(path = %path.display(), records = records.len(), "Loaded document");
                        report.records.extend(records);
                        report.loaded_files.push(path.clone());
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping document");
                        report.skipped.push(SkippedFile {
                            path: path.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            dir = %dir.display(),
            files = report.loaded_files.len(),
            records = report.records.len(),
            skipped = report.skipped_count(),
            "Loaded documents"
        );
        Ok(report)
    }

    /// Load a single file with the first matching loader.
    ///
    /// # Errors
    ///
    /// [`ChatError::Load`] when no pattern matches or extraction fails.
    pub fn load_file(&self, path: &Path) -> Result<Vec<DocumentRecord>> {
        let entry = self
            .entry_for(path)
            .ok_or_else(|| ChatError::load(path, "no loader matches this file"))?;
        load_with(entry, path)
    }
}

fn load_with(entry: &Entry, path: &Path) -> Result<Vec<DocumentRecord>> {
    let bytes = std::fs::read(path).map_err(|e| ChatError::load(path, e))?;
    let fail = |e: extract::ExtractError| ChatError::load(path, e);
    let single = |text: String| vec![DocumentRecord::new(path, text)];

    let records = match entry.spec.kind {
        LoaderKind::Pdf => extract::pdf_pages(&bytes)
            .map_err(fail)?
            .into_iter()
            .enumerate()
            .map(|(page, text)| DocumentRecord::new(path, text).with_part(page as u32))
            .collect(),
        LoaderKind::Csv => extract::csv_rows(&bytes, entry.delimiter)
            .map_err(fail)?
            .into_iter()
            .enumerate()
            .map(|(row, text)| DocumentRecord::new(path, text).with_meta("row", row.to_string()))
            .collect(),
        LoaderKind::Spreadsheet => single(extract::xlsx(&bytes).map_err(fail)?),
        LoaderKind::Html => single(extract::html_to_text(&String::from_utf8_lossy(&bytes))),
        LoaderKind::Json => {
            let lines = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
            extract::json_records(&bytes, lines)
                .map_err(fail)?
                .into_iter()
                .enumerate()
                .map(|(i, text)| {
                    DocumentRecord::new(path, text).with_meta("seq_num", (i + 1).to_string())
                })
                .collect()
        }
        LoaderKind::Markdown => single(extract::markdown_to_text(&utf8(path, bytes)?)),
        LoaderKind::Text => single(utf8(path, bytes)?),
        LoaderKind::Word => single(extract::docx(&bytes).map_err(fail)?),
        LoaderKind::Odt => single(extract::odt(&bytes).map_err(fail)?),
        LoaderKind::PowerPoint => single(extract::pptx(&bytes).map_err(fail)?),
        LoaderKind::Epub => single(extract::epub(&bytes).map_err(fail)?),
        LoaderKind::Email => {
            let email = match extract::email(&bytes, "text/plain") {
                Ok(email) => email,
                Err(plain_err) => {
                    debug!(path = %path.display(), error = %plain_err, "No plain text body, retrying with text/html");
                    extract::email(&bytes, "text/html").map_err(fail)?
                }
            };
            let mut record = DocumentRecord::new(path, email.body);
            if let Some(subject) = email.subject {
                record = record.with_meta("subject", subject);
            }
            if let Some(from) = email.from {
                record = record.with_meta("from", from);
            }
            vec![record]
        }
        LoaderKind::Evernote => extract::enex_notes(&bytes)
            .map_err(fail)?
            .into_iter()
            .map(|(title, text)| DocumentRecord::new(path, text).with_meta("title", title))
            .collect(),
    };
    Ok(records)
}

fn utf8(path: &Path, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| ChatError::load(path, format!("invalid UTF-8: {}", e)))
}
