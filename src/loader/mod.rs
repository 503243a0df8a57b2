//! Source document loading.
//!
//! Every loader produces the same fixed-shape [`Document`] record. Loaders
//! never abort a whole batch because of one bad input: missing directories
//! and unreadable or malformed files are logged and skipped.
pub mod pdf;
pub mod text;
pub mod wiki;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::config::DomainConfig;

pub use pdf::load_pdf_dir;
pub use text::load_text_dir;
pub use wiki::{export_wiki_to_text, load_wiki_export};

/// Errors raised while reading source documents.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("document directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Kind of source a document was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Pdf,
    Text,
    WikiPage,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Pdf => "pdf",
            ContentType::Text => "text",
            ContentType::WikiPage => "wiki_page",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(ContentType::Pdf),
            "text" => Ok(ContentType::Text),
            "wiki_page" => Ok(ContentType::WikiPage),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Metadata carried by a document and every chunk derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Citation tag shown next to retrieved excerpts.
    pub source: String,
    /// Originating file; the identity used when syncing a store.
    pub source_path: String,
    pub title: String,
    pub page: Option<u32>,
    pub section: Option<String>,
    pub url: Option<String>,
    pub content_type: ContentType,
    /// Hex SHA-256 of the source bytes.
    pub fingerprint: Option<String>,
}

impl Metadata {
    /// Metadata whose citation tag and source identity are both `source_path`.
    pub fn new(
        source_path: impl Into<String>,
        title: impl Into<String>,
        content_type: ContentType,
    ) -> Self {
        let source_path = source_path.into();
        Self {
            source: source_path.clone(),
            source_path,
            title: title.into(),
            page: None,
            section: None,
            url: None,
            content_type,
            fingerprint: None,
        }
    }
}

/// A loaded source document. Discarded once it has been chunked.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub content: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Every document a domain's configured corpora provide.
///
/// Corpora that are not configured or whose directory is absent contribute
/// nothing.
pub fn load_domain(domain: &DomainConfig) -> Vec<Document> {
    let mut documents = Vec::new();
    if let Some(dir) = &domain.pdf_dir {
        documents.extend(load_pdf_dir(dir, &domain.pdf_pattern));
    }
    if let Some(dir) = &domain.text_dir {
        documents.extend(load_text_dir(dir, &domain.text_pattern, &domain.text_origin));
    }
    if let Some(path) = &domain.wiki_export {
        documents.extend(load_wiki_export(path, &domain.text_origin));
    }
    info!("Loaded {} documents", documents.len());
    documents
}

/// Store-friendly path string: forward slashes on every platform.
pub(crate) fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// File name without its extension.
pub(crate) fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Sorted files in `dir` matching the glob `pattern`.
pub(crate) fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, LoadError> {
    if !dir.is_dir() {
        return Err(LoadError::MissingDirectory(dir.to_path_buf()));
    }

    let full = dir.join(pattern);
    let entries = glob::glob(&full.to_string_lossy()).map_err(|e| LoadError::Parse {
        path: full.clone(),
        reason: format!("invalid glob pattern: {e}"),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}
