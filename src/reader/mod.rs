//! Directory reader
//!
//! Loads every supported file under a directory as [`Document`]s.
//! Text files become one document each; PDFs become one document per page.
//! `.gitignore` patterns and hidden files are respected.

mod pdf;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;

use crate::node::{Document, Metadata};

// ============================================================================
// File Types
// ============================================================================

/// Supported file types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Plain text, markdown, source files
    Text,
    Pdf,
}

impl FileType {
    /// File type from extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "md" | "txt" | "rst" | "markdown" | "text" | "csv" | "json" | "yaml" | "yml"
            | "toml" | "html" | "htm" | "xml" | "rs" | "py" | "js" | "ts" | "go" | "java"
            | "c" | "cpp" | "h" | "sh" | "sql" => Some(FileType::Text),
            "pdf" => Some(FileType::Pdf),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// MIME type recorded in metadata
    pub fn mime(&self, path: &Path) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Text => match path.extension().and_then(|e| e.to_str()) {
                Some("md") | Some("markdown") => "text/markdown",
                Some("html") | Some("htm") => "text/html",
                Some("csv") => "text/csv",
                Some("json") => "application/json",
                _ => "text/plain",
            },
        }
    }
}

// ============================================================================
// Reader Config
// ============================================================================

/// Directory reader settings
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Only these extensions (empty: every supported one)
    pub required_exts: Vec<String>,
    /// Stop after this many files
    pub num_files_limit: Option<usize>,
    /// Skip larger files (bytes, 0 = no limit)
    pub max_file_size: u64,
    pub include_hidden: bool,
    pub respect_gitignore: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            recursive: false,
            required_exts: vec![],
            num_files_limit: None,
            max_file_size: 10 * 1024 * 1024, // 10MB
            include_hidden: false,
            respect_gitignore: true,
        }
    }
}

// ============================================================================
// DirectoryReader
// ============================================================================

/// Reads a directory into documents
pub struct DirectoryReader {
    root: PathBuf,
    config: ReaderConfig,
}

impl DirectoryReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, ReaderConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: ReaderConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Supported files under the root, sorted by path
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let root = absolute(&self.root)?;

        if !root.exists() {
            anyhow::bail!("Directory not found: {:?}", root);
        }
        if !root.is_dir() {
            anyhow::bail!("Not a directory: {:?}", root);
        }

        let mut builder = WalkBuilder::new(&root);
        builder
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore);
        if !self.config.recursive {
            builder.max_depth(Some(1));
        }

        let mut files = Vec::new();

        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            if self.should_include(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();

        if let Some(limit) = self.config.num_files_limit {
            files.truncate(limit);
        }

        if files.is_empty() {
            anyhow::bail!("No files found in {:?}", root);
        }

        tracing::info!("Found {} files in {:?}", files.len(), root);
        Ok(files)
    }

    /// Load every file under the root
    pub async fn load_data(&self) -> Result<Vec<Document>> {
        let files = self.list_files()?;
        let mut documents = Vec::new();

        for path in &files {
            let docs = load_file(path).await?;
            documents.extend(docs);
        }

        tracing::info!(
            "Loaded {} documents from {} files",
            documents.len(),
            files.len()
        );
        Ok(documents)
    }

    fn should_include(&self, path: &Path) -> bool {
        if FileType::from_path(path).is_none() {
            return false;
        }

        if !self.config.required_exts.is_empty() {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            let wanted = self
                .config
                .required_exts
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext));
            if !wanted {
                return false;
            }
        }

        if self.config.max_file_size > 0 {
            if let Ok(meta) = std::fs::metadata(path) {
                if meta.len() > self.config.max_file_size {
                    tracing::debug!("Skipping large file: {:?} ({} bytes)", path, meta.len());
                    return false;
                }
            }
        }

        true
    }
}

/// Load one file (PDFs yield one document per page)
pub async fn load_file(path: &Path) -> Result<Vec<Document>> {
    let path = absolute(path)?;
    let file_type = FileType::from_path(&path)
        .ok_or_else(|| anyhow::anyhow!("Unsupported file type: {:?}", path))?;

    let fs_meta = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("Failed to read metadata: {:?}", path))?;

    let base = Metadata {
        file_path: Some(path.display().to_string()),
        file_name: path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string()),
        file_type: Some(file_type.mime(&path).to_string()),
        file_size: Some(fs_meta.len()),
        last_modified: fs_meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%d").to_string()),
        ..Default::default()
    };

    match file_type {
        FileType::Text => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read file: {:?}", path))?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            Ok(vec![Document::new(text, base)])
        }
        FileType::Pdf => {
            let pdf_path = path.clone();
            let pages = tokio::task::spawn_blocking(move || pdf::extract_pages(&pdf_path))
                .await
                .context("PDF extraction task failed")??;

            Ok(pages
                .into_iter()
                .map(|(page, text)| {
                    let metadata = Metadata {
                        page_label: Some(page.to_string()),
                        ..base.clone()
                    };
                    Document::new(text, metadata)
                })
                .collect())
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// ============================================================================
// Tests
// ============================================================================
