use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use crate::loader::{ContentType, Metadata};

/// An entry to be written by [`super::VectorStore::add`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub content: String,
    pub metadata: Metadata,
    pub position: usize,
    pub vector: Vec<f32>,
}

/// A source whose last chunk is part of a [`super::VectorStore::commit_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSource {
    pub source_path: String,
    pub fingerprint: Option<String>,
    pub chunks: usize,
}

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: i64,
    pub content: String,
    pub metadata: Metadata,
    pub position: usize,
    /// Cosine similarity mapped to `[0, 1]`; higher is closer.
    pub score: f32,
}

/// Per-source rollup of what a store holds.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub source_path: String,
    pub title: String,
    pub chunks: usize,
    pub fingerprint: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// Column list matching [`metadata_from_row`], for `SELECT`s over `entries e`.
pub(crate) const METADATA_COLUMNS: &str =
    "e.source, e.source_path, e.title, e.page, e.section, e.url, e.content_type, e.fingerprint";

/// Read the eight [`METADATA_COLUMNS`] starting at column `offset`.
pub(crate) fn metadata_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Metadata> {
    let content_type: String = row.get(offset + 6)?;
    let content_type = content_type.parse::<ContentType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(offset + 6, Type::Text, e.into())
    })?;

    Ok(Metadata {
        source: row.get(offset)?,
        source_path: row.get(offset + 1)?,
        title: row.get(offset + 2)?,
        page: row.get(offset + 3)?,
        section: row.get(offset + 4)?,
        url: row.get(offset + 5)?,
        content_type,
        fingerprint: row.get(offset + 7)?,
    })
}
