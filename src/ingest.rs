//! Document ingestion: directory scan → PDF extraction → chunking.
//!
//! Failure policy:
//! - the data directory cannot be read → error logged, empty result;
//! - a single file cannot be read or yields no text → warning logged,
//!   file skipped, the rest of the run continues.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::chunk::TextSplitter;
use crate::config::DataConfig;
use crate::extract::{content_type_for, extract_text};
use crate::models::Chunk;

/// Per-file outcome, used by `index --dry-run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file_name: String,
    pub chunks: usize,
    pub skipped: Option<String>,
}

/// List candidate documents under `config.dir`, sorted by relative path.
pub fn scan_documents(config: &DataConfig) -> Result<Vec<PathBuf>> {
    let root = &config.dir;
    if !root.is_dir() {
        bail!("Data directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let max_depth = if config.recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in WalkDir::new(root).max_depth(max_depth) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if include_set.is_match(relative) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Read every document and split it into chunks tagged with its file name.
pub fn collect_chunks(config: &DataConfig, splitter: &TextSplitter) -> Vec<Chunk> {
    let (chunks, _) = collect_with_report(config, splitter);
    chunks
}

/// Per-file chunk counts without keeping the chunks.
pub fn chunk_report(config: &DataConfig, splitter: &TextSplitter) -> Vec<FileReport> {
    let (_, reports) = collect_with_report(config, splitter);
    reports
}

/// Like [`collect_chunks`], also returning what happened to each file.
pub fn collect_with_report(
    config: &DataConfig,
    splitter: &TextSplitter,
) -> (Vec<Chunk>, Vec<FileReport>) {
    let files = match scan_documents(config) {
        Ok(files) => files,
        Err(e) => {
            error!(dir = %config.dir.display(), error = %e, "Failed to access data directory");
            return (Vec::new(), Vec::new());
        }
    };
    info!(count = files.len(), dir = %config.dir.display(), "Found policy documents");

    let mut all_chunks = Vec::new();
    let mut reports = Vec::with_capacity(files.len());

    for path in &files {
        let file_name = display_name(path, &config.dir);
        match read_document(path) {
            Ok(text) if text.trim().is_empty() => {
                warn!(file = %file_name, "Document appears to be empty or unreadable; skipping");
                reports.push(FileReport {
                    file_name,
                    chunks: 0,
                    skipped: Some("no extractable text".to_string()),
                });
            }
            Ok(text) => {
                let chunks = splitter.split_document(&text, &file_name);
                info!(file = %file_name, chunks = chunks.len(), "Processed document");
                reports.push(FileReport {
                    file_name,
                    chunks: chunks.len(),
                    skipped: None,
                });
                all_chunks.extend(chunks);
            }
            Err(e) => {
                error!(file = %file_name, error = %e, "Error reading document; skipping");
                reports.push(FileReport {
                    file_name,
                    chunks: 0,
                    skipped: Some(e.to_string()),
                });
            }
        }
    }

    info!(total = all_chunks.len(), "Total chunks generated across all files");
    (all_chunks, reports)
}

fn read_document(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let content_type = content_type_for(&name)
        .ok_or_else(|| anyhow::anyhow!("unsupported document type: {}", name))?;
    let bytes = std::fs::read(path)?;
    let text = extract_text(&bytes, content_type)?;
    debug!(file = %name, chars = text.len(), "Extracted text");
    Ok(text)
}

fn display_name(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use tempfile::TempDir;

    fn data_config(dir: &Path) -> DataConfig {
        DataConfig {
            dir: dir.to_path_buf(),
            ..DataConfig::default()
        }
    }

    #[test]
    fn missing_directory_yields_no_chunks() {
        let tmp = TempDir::new().unwrap();
        let cfg = data_config(&tmp.path().join("absent"));
        let splitter = TextSplitter::from_config(&ChunkingConfig::default());
        assert!(collect_chunks(&cfg, &splitter).is_empty());
    }

    #[test]
    fn scan_filters_by_glob_and_sorts() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(tmp.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/c.pdf"), b"x").unwrap();

        let files = scan_documents(&data_config(tmp.path())).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn unreadable_pdf_is_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.pdf"), b"not a pdf").unwrap();
        let splitter = TextSplitter::from_config(&ChunkingConfig::default());

        let (chunks, reports) = collect_with_report(&data_config(tmp.path()), &splitter);
        assert!(chunks.is_empty());
        assert_eq!(reports.len(), 1);
        assert!(reports[0].skipped.is_some());
    }
}
