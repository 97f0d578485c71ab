//! Filesystem document loader.
//!
//! Walks the documents root, filters paths through glob excludes and turns
//! every supported file into one or more [`Document`]s. PDFs produce one
//! document per page; other formats produce one document per file.
//!
//! Unsupported extensions are skipped quietly. Files that cannot be read or
//! extracted are logged and skipped so a single bad file does not abort an
//! ingestion run.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::error::{Error, Result};
use crate::extract::{extract_pages, ContentType};
use crate::models::Document;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Load every supported document under `root`, sorted by relative path.
pub fn load_documents(root: &Path, options: &DocumentsConfig) -> Result<Vec<Document>> {
    if !root.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("documents root does not exist: {}", root.display()),
        )));
    }

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(options.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if exclude_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut documents = Vec::new();
    for (rel, path) in files {
        match load_file(&path, &rel, options.max_file_bytes) {
            Ok(docs) => documents.extend(docs),
            Err(Error::UnsupportedDocumentType(ext)) => {
                tracing::debug!(file = %rel, ext = %ext, "skipping unsupported file");
            }
            Err(e) => tracing::warn!(file = %rel, error = %e, "skipping file"),
        }
    }

    tracing::info!(root = %root.display(), documents = documents.len(), "loaded documents");
    Ok(documents)
}

/// Load one file. `source` is the path recorded on the resulting documents.
pub fn load_file(path: &Path, source: &str, max_file_bytes: u64) -> Result<Vec<Document>> {
    let content_type = content_type_of(path, source)?;

    let size = std::fs::metadata(path)?.len();
    check_size(source, size, max_file_bytes)?;

    let bytes = std::fs::read(path)?;
    to_documents(source, &bytes, content_type)
}

/// Documents from in-memory file contents, typed by the extension of
/// `source`. Nothing touches the filesystem.
pub fn load_bytes(source: &str, bytes: &[u8], max_file_bytes: u64) -> Result<Vec<Document>> {
    let content_type = content_type_of(Path::new(source), source)?;
    check_size(source, bytes.len() as u64, max_file_bytes)?;
    to_documents(source, bytes, content_type)
}

fn content_type_of(path: &Path, source: &str) -> Result<ContentType> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    ContentType::from_extension(&ext).ok_or_else(|| Error::UnsupportedDocumentType(source.to_string()))
}

fn check_size(source: &str, size: u64, max_file_bytes: u64) -> Result<()> {
    if size > max_file_bytes {
        return Err(Error::extract(
            source,
            format!("file is {} bytes, limit is {}", size, max_file_bytes),
        ));
    }
    Ok(())
}

fn to_documents(source: &str, bytes: &[u8], content_type: ContentType) -> Result<Vec<Document>> {
    let pages =
        extract_pages(bytes, content_type).map_err(|e| Error::extract(source, e.to_string()))?;

    let paginated = content_type.is_paginated();
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Document {
            source: source.to_string(),
            page: paginated.then_some(i as u32 + 1),
            content_type: content_type.mime().to_string(),
            text,
        })
        .collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("invalid glob set: {}", e)))
}
