//! Query-time retrieval contract for the agent layer.
//!
//! Results are rendered as citation blocks headed by [`CITATION_TAG`], the
//! one token downstream consumers split answers on.
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{StoreError, VectorStore};
use crate::embedder::{Embedder, EmbedderError};

/// Opening token of every citation block.
pub const CITATION_TAG: &str = "[source:";

/// Returned instead of an answer when nothing relevant could be retrieved.
pub const NO_INFORMATION: &str = "No relevant information was found.";

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embed(#[from] EmbedderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A retrieved passage, ready to cite.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub title: String,
    pub source: String,
    pub content_excerpt: String,
    pub score: f32,
}

pub struct Retriever<'a, E: Embedder + ?Sized> {
    store: &'a VectorStore,
    embedder: &'a E,
    pub top_k: usize,
    pub score_threshold: Option<f32>,
    pub excerpt_chars: usize,
}

impl<'a, E: Embedder + ?Sized> Retriever<'a, E> {
    pub fn new(store: &'a VectorStore, embedder: &'a E) -> Self {
        Self {
            store,
            embedder,
            top_k: 5,
            score_threshold: None,
            excerpt_chars: 500,
        }
    }

    /// Top matches for `query`, best first.
    pub fn retrieve(&self, query: &str) -> Result<Vec<Reference>, RetrievalError> {
        let vector = self.embedder.embed(query)?;
        let hits = self
            .store
            .search(&vector, self.top_k, self.score_threshold)?;
        debug!("{} hits for query in {}", hits.len(), self.store.path().display());
        for hit in &hits {
            debug!("{:.3}  {} - {}", hit.score, hit.metadata.title, hit.metadata.source);
        }

        Ok(hits
            .into_iter()
            .map(|hit| Reference {
                title: hit.metadata.title,
                source: hit.metadata.source,
                content_excerpt: excerpt(&hit.content, self.excerpt_chars),
                score: hit.score,
            })
            .collect())
    }

    /// Formatted citation blocks for `query`. Never fails: an error is
    /// logged and reported as [`NO_INFORMATION`].
    pub fn lookup(&self, query: &str) -> String {
        match self.retrieve(query) {
            Ok(refs) => format_references(&refs),
            Err(e) => {
                warn!("Retrieval failed: {e}");
                NO_INFORMATION.to_string()
            }
        }
    }
}

/// First `max_chars` characters of `content`, with `...` when cut.
fn excerpt(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &content[..byte]),
        None => content.to_string(),
    }
}

/// Render references as `[source: <title> - <source>]` blocks separated by
/// blank lines, or [`NO_INFORMATION`] when there are none.
pub fn format_references(refs: &[Reference]) -> String {
    if refs.is_empty() {
        return NO_INFORMATION.to_string();
    }
    refs.iter()
        .map(|r| format!("{CITATION_TAG} {} - {}]\n{}", r.title, r.source, r.content_excerpt))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split an answer into its body and the citation blocks appended to it.
pub fn split_references(answer: &str) -> (String, Vec<String>) {
    let mut parts = answer.split(CITATION_TAG);
    let body = parts.next().unwrap_or_default().trim().to_string();
    let refs = parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("{CITATION_TAG} {p}"))
        .collect();
    (body, refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewEntry;
    use crate::embedder::mock::MockEmbedder;
    use crate::loader::{ContentType, Metadata};

    fn reference(title: &str, source: &str, excerpt: &str) -> Reference {
        Reference {
            title: title.to_string(),
            source: source.to_string(),
            content_excerpt: excerpt.to_string(),
            score: 0.9,
        }
    }

    fn store_with(embedder: &MockEmbedder, passages: &[(&str, &str)]) -> VectorStore {
        let mut store = VectorStore::open_in_memory(embedder.dimensions()).unwrap();
        let entries: Vec<NewEntry> = passages
            .iter()
            .map(|(title, content)| NewEntry {
                content: content.to_string(),
                metadata: Metadata::new(format!("legal_docs/{title}.pdf"), *title, ContentType::Pdf),
                position: 0,
                vector: embedder.embed(content).unwrap(),
            })
            .collect();
        store.add(&entries).unwrap();
        store
    }

    #[test]
    fn test_excerpt_caps_length() {
        assert_eq!(excerpt("short", 500), "short");
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("개인정보보호법", 4), "개인정보...");
    }

    #[test]
    fn test_format_references() {
        let text = format_references(&[
            reference("PIPA", "legal_docs/pipa.pdf", "Article 15 ..."),
            reference("Guide", "confluence", "Cutoff is 17:00"),
        ]);
        assert_eq!(
            text,
            "[source: PIPA - legal_docs/pipa.pdf]\nArticle 15 ...\n\n[source: Guide - confluence]\nCutoff is 17:00"
        );
        assert_eq!(format_references(&[]), NO_INFORMATION);
    }

    #[test]
    fn test_split_references() {
        let answer = "Consent is required.\n\n[source: PIPA - pipa.pdf]\nArticle 15\n[source: Decree - decree.pdf]";
        let (body, refs) = split_references(answer);
        assert_eq!(body, "Consent is required.");
        assert_eq!(
            refs,
            vec![
                "[source: PIPA - pipa.pdf]\nArticle 15".to_string(),
                "[source: Decree - decree.pdf]".to_string(),
            ]
        );

        let (body, refs) = split_references("No citations here.");
        assert_eq!(body, "No citations here.");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_retrieve_ranks_exact_passage_first() {
        let embedder = MockEmbedder::new(32);
        let store = store_with(
            &embedder,
            &[
                ("pipa", "Article 15 Collection and use of personal information"),
                ("decree", "Article 30 Measures to ensure safety"),
            ],
        );
        let retriever = Retriever::new(&store, &embedder);

        let refs = retriever
            .retrieve("Article 30 Measures to ensure safety")
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].title, "decree");
        assert_eq!(refs[0].source, "legal_docs/decree.pdf");
        assert!(refs[0].score > 0.99);
    }

    #[test]
    fn test_lookup_degrades_on_failure() {
        let embedder = MockEmbedder::new(32);
        let store = store_with(&embedder, &[("pipa", "Article 15")]);

        // Query vectors of the wrong size make the search fail.
        let wrong = MockEmbedder::new(16);
        let retriever = Retriever::new(&store, &wrong);
        assert_eq!(retriever.lookup("Article 15"), NO_INFORMATION);

        let mut strict = Retriever::new(&store, &embedder);
        strict.score_threshold = Some(1.1);
        assert_eq!(strict.lookup("Article 15"), NO_INFORMATION);

        let ok = Retriever::new(&store, &embedder).lookup("Article 15");
        assert!(ok.starts_with("[source: pipa - legal_docs/pipa.pdf]\nArticle 15"));
    }
}
