//! Plain-text loader for pre-converted corpora (e.g. wiki exports).
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::{
    ContentType, Document, LoadError, Metadata, file_title, fingerprint, matching_files,
    normalize_path,
};

/// Load every text file in `dir` matching `pattern`.
///
/// `origin` becomes the citation tag of each document; the title is the
/// file name without extension. Files whose trimmed content is empty are
/// skipped.
pub fn load_text_dir(dir: &Path, pattern: &str, origin: &str) -> Vec<Document> {
    let files = match matching_files(dir, pattern) {
        Ok(files) => files,
        Err(e) => {
            warn!("{e}");
            return Vec::new();
        }
    };

    let mut docs = Vec::new();
    for file in &files {
        match load_text_file(file, origin) {
            Ok(Some(doc)) => docs.push(doc),
            Ok(None) => info!("Skipping empty file: {}", file.display()),
            Err(e) => warn!("Skipping text file: {e}"),
        }
    }

    info!(
        "Loaded {} text document(s) from {}",
        docs.len(),
        dir.display()
    );
    docs
}

/// Load one text file. Returns `Ok(None)` for blank files.
pub fn load_text_file(path: &Path, origin: &str) -> Result<Option<Document>, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let content = String::from_utf8(bytes).map_err(|e| LoadError::Parse {
        path: path.to_path_buf(),
        reason: format!("not valid UTF-8: {e}"),
    })?;

    if content.trim().is_empty() {
        return Ok(None);
    }

    let mut metadata = Metadata::new(normalize_path(path), file_title(path), ContentType::Text);
    metadata.source = origin.to_string();
    metadata.fingerprint = Some(fingerprint(content.as_bytes()));

    Ok(Some(Document::new(content, metadata)))
}
