//! Fetch configured artifacts (model, embeddings, vector index, documents).
//!
//! Each `*_download` URL in the config is paired with the path it fills.
//! Pairs whose path already exists, or that have no URL, are skipped. A
//! `.zip` URL is saved as `<path>.zip` and extracted into `path`; anything
//! else is saved as `<path>-ddl` and renamed to `path` once complete.
//!
//! Failures are logged and reported, never returned as errors: a missing
//! artifact surfaces later, for example as an unbuilt vector index.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use libre_chat_core::{ChatError, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;

/// Large model files can take a while.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub url: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadFailure {
    pub url: String,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub downloaded: Vec<PathBuf>,
    /// Paths that already existed.
    pub present: Vec<PathBuf>,
    pub failed: Vec<DownloadFailure>,
}

impl DownloadReport {
    pub fn print(&self) {
        println!("download artifacts");
        println!("  downloaded: {}", self.downloaded.len());
        println!("  already present: {}", self.present.len());
        println!("  failed: {}", self.failed.len());
        for failure in &self.failed {
            println!("    {}: {}", failure.url, failure.message);
        }
        println!("ok");
    }
}

/// `(url, path)` pairs from the config, in a fixed order.
pub fn download_jobs(config: &Config) -> Vec<(Option<String>, Option<PathBuf>)> {
    vec![
        (config.llm.model_download.clone(), config.llm.model_path.clone()),
        (
            config.embedding.embeddings_download.clone(),
            config.embedding.embeddings_path.clone(),
        ),
        (
            config.vector.vector_download.clone(),
            config.vector.vector_path.clone(),
        ),
        (
            config.vector.documents_download.clone(),
            Some(config.vector.documents_path.clone()),
        ),
    ]
}

/// Download every missing artifact on up to `info.workers` threads.
pub fn download_artifacts(config: &Config) -> DownloadReport {
    let mut report = DownloadReport::default();
    let mut pending = Vec::new();
    for (url, path) in download_jobs(config) {
        let Some(path) = path else { continue };
        if path.exists() {
            if url.is_some() {
                report.present.push(path);
            }
            continue;
        }
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            pending.push(DownloadJob { url, path });
        }
    }
    if pending.is_empty() {
        return report;
    }

    let client = match reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            for job in pending {
                report.failed.push(DownloadFailure {
                    message: format!("cannot build HTTP client: {}", e),
                    url: job.url,
                    path: job.path,
                });
            }
            return report;
        }
    };

    let workers = config.info.workers.clamp(1, pending.len());
    let queue = Mutex::new(pending);
    let results = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let job = match queue.lock() {
                    Ok(mut jobs) => jobs.pop(),
                    Err(_) => None,
                };
                let Some(job) = job else { break };
                let outcome = download_one(&client, &job);
                if let Ok(mut results) = results.lock() {
                    results.push((job, outcome));
                }
            });
        }
    });

    for (job, outcome) in results.into_inner().unwrap_or_default() {
        match outcome {
            Ok(()) => report.downloaded.push(job.path),
            Err(err) => {
                warn!(url = %job.url, path = %job.path.display(), error = %err, "Download failed");
                report.failed.push(DownloadFailure {
                    url: job.url,
                    path: job.path,
                    message: err.to_string(),
                });
            }
        }
    }
    report
}

fn download_one(client: &reqwest::blocking::Client, job: &DownloadJob) -> Result<()> {
    let download_err = |message: String| ChatError::Download {
        url: job.url.clone(),
        message,
    };
    if let Some(parent) = job.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let is_zip = job.url.to_ascii_lowercase().ends_with(".zip");
    let staging = staging_path(&job.path, is_zip);
    info!(url = %job.url, to = %staging.display(), "Downloading");

    let mut response = client
        .get(&job.url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| download_err(e.to_string()))?;
    let mut file = File::create(&staging)?;
    response
        .copy_to(&mut file)
        .map_err(|e| download_err(e.to_string()))?;
    drop(file);

    if is_zip {
        let files = unzip_into(&staging, &job.path)?;
        std::fs::remove_file(&staging)?;
        info!(url = %job.url, path = %job.path.display(), files, "Downloaded and extracted");
    } else {
        std::fs::rename(&staging, &job.path)?;
        info!(url = %job.url, path = %job.path.display(), "Downloaded");
    }
    Ok(())
}

fn staging_path(path: &Path, is_zip: bool) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(if is_zip { ".zip" } else { "-ddl" });
    PathBuf::from(name)
}

/// Extract `archive` into `dest`, creating it. Returns the number of entries.
///
/// Entries whose path would escape `dest` are rejected by the zip reader.
/// When extraction fails, a `dest` created by this call is removed again so
/// the artifact is not mistaken for present; an existing `dest` is kept.
pub fn unzip_into(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| ChatError::load(archive, format!("invalid zip archive: {}", e)))?;
    let created = !dest.exists();
    std::fs::create_dir_all(dest)?;
    let entries = zip.len();
    if let Err(e) = zip.extract(dest) {
        if created {
            if let Err(cleanup) = std::fs::remove_dir_all(dest) {
                warn!(path = %dest.display(), error = %cleanup, "Cannot remove partial extraction");
            }
        }
        return Err(ChatError::load(
            archive,
            format!("cannot extract archive: {}", e),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn staging_names() {
        assert_eq!(
            staging_path(Path::new("models/llama.gguf"), false),
            PathBuf::from("models/llama.gguf-ddl")
        );
        assert_eq!(
            staging_path(Path::new("vectorstore/db"), true),
            PathBuf::from("vectorstore/db.zip")
        );
    }

    #[test]
    fn unzip_extracts_nested_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("docs.zip");
        write_zip(&archive, &[("a.txt", "alpha"), ("sub/b.txt", "beta")]);

        let dest = tmp.path().join("documents");
        assert_eq!(unzip_into(&archive, &dest).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "beta");
    }

    #[test]
    fn failed_extraction_removes_created_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bad.zip");
        write_zip(&archive, &[("ok.txt", "fine"), ("../escape.txt", "nope")]);

        let dest = tmp.path().join("model");
        assert!(unzip_into(&archive, &dest).is_err());
        assert!(!dest.exists());
        assert!(!tmp.path().join("escape.txt").exists());

        let existing = tmp.path().join("documents");
        std::fs::create_dir_all(&existing).unwrap();
        std::fs::write(existing.join("keep.txt"), "kept").unwrap();
        assert!(unzip_into(&archive, &existing).is_err());
        assert!(existing.join("keep.txt").exists());
    }

    #[test]
    fn existing_paths_and_missing_urls_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vector.documents_path = tmp.path().to_path_buf();
        config.vector.documents_download = Some("http://127.0.0.1:1/docs.zip".to_string());
        config.llm.model_path = Some(tmp.path().join("model.gguf"));

        let report = download_artifacts(&config);
        assert!(report.downloaded.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.present, vec![tmp.path().to_path_buf()]);
    }

    #[test]
    fn unreachable_url_is_reported_not_raised() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vector.documents_path = tmp.path().join("documents");
        config.vector.documents_download = Some("http://127.0.0.1:1/docs.zip".to_string());

        let report = download_artifacts(&config);
        assert_eq!(report.failed.len(), 1);
        assert!(!tmp.path().join("documents").exists());
    }
}
