use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, info};

use crate::db::models::{CompletedSource, NewEntry};
use crate::db::{StoreError, VectorStore};
use crate::embedder::{Embedder, EmbedderError};
use crate::indexer::backoff::RetryPolicy;
use crate::indexer::chunker::{self, Chunk, ChunkingConfig};
use crate::loader::Document;

/// Batching, retry and pacing knobs for one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Fixed pause between consecutive batches.
    pub batch_delay: Duration,
    pub min_chunk_chars: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 64,
            retry: RetryPolicy::default(),
            batch_delay: Duration::from_millis(300),
            min_chunk_chars: 50,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Chunks written to the store.
    pub added: usize,
    /// Chunks dropped by the short-chunk filter.
    pub skipped: usize,
    pub sources_added: usize,
    pub sources_skipped: usize,
    pub sources_replaced: usize,
}

/// Failure of one embed-and-add step.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Embed(#[from] EmbedderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BatchError {
    fn is_retryable(&self) -> bool {
        match self {
            BatchError::Embed(e) => e.is_transient(),
            BatchError::Store(StoreError::Sqlite(_)) => true,
            BatchError::Store(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    /// A batch kept failing; the run stopped. Earlier batches stay stored.
    #[error("batch {batch} failed after {attempts} attempt(s): {source}")]
    BatchFailed {
        batch: usize,
        attempts: u32,
        #[source]
        source: BatchError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives chunk → embed → add into one store, batch by batch.
pub struct Ingestor<'a, E: Embedder + ?Sized> {
    store: &'a mut VectorStore,
    embedder: &'a E,
    chunking: ChunkingConfig,
    settings: IngestSettings,
    show_progress: bool,
}

impl<'a, E: Embedder + ?Sized> Ingestor<'a, E> {
    pub fn new(
        store: &'a mut VectorStore,
        embedder: &'a E,
        chunking: ChunkingConfig,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            settings,
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while indexing.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Index every document, regardless of what the store already holds.
    pub fn ingest(&mut self, documents: &[Document]) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport {
            sources_added: group_by_source(documents).len(),
            ..IngestReport::default()
        };
        self.index_documents(documents, &mut report)?;
        Ok(report)
    }

    /// Index only sources the store lacks or whose fingerprint changed.
    ///
    /// A changed source has its old entries deleted before the new ones are
    /// added. A candidate without a fingerprint is matched by path alone.
    /// Entries left by an interrupted run are replaced like a changed source.
    pub fn sync(&mut self, documents: &[Document]) -> Result<IngestReport, IngestError> {
        let existing = self.store.sources()?;
        let partial = self.store.partial_sources()?;
        let mut report = IngestReport::default();
        let mut selected: Vec<Document> = Vec::new();

        for (source_path, docs) in group_by_source(documents) {
            let candidate = docs[0].metadata.fingerprint.as_deref();
            match existing.get(source_path) {
                None if partial.contains(source_path) => {
                    let removed = self.store.delete_source(source_path)?;
                    info!("Source was partially indexed, removed {removed} entries: {source_path}");
                    report.sources_replaced += 1;
                }
                None => {
                    report.sources_added += 1;
                }
                Some(stored) if candidate.is_none() || candidate == stored.as_deref() => {
                    debug!("Unchanged source, skipping: {source_path}");
                    report.sources_skipped += 1;
                    continue;
                }
                Some(_) => {
                    let removed = self.store.delete_source(source_path)?;
                    info!("Source changed, removed {removed} stale entries: {source_path}");
                    report.sources_replaced += 1;
                }
            }
            selected.extend(docs.into_iter().cloned());
        }

        info!(
            "Sync plan: {} new, {} changed, {} unchanged",
            report.sources_added, report.sources_replaced, report.sources_skipped
        );
        self.index_documents(&selected, &mut report)?;
        Ok(report)
    }

    fn index_documents(
        &mut self,
        documents: &[Document],
        report: &mut IngestReport,
    ) -> Result<(), IngestError> {
        let chunks = chunker::chunk_documents(documents, self.chunking);
        let total = chunks.len();
        let chunks = chunker::filter_short(chunks, self.settings.min_chunk_chars);
        report.skipped += total - chunks.len();

        // Index of each source's last chunk; a source is complete once the
        // batch holding it commits.
        let mut last_chunk: HashMap<&str, usize> = HashMap::new();
        let mut chunk_counts: HashMap<&str, usize> = HashMap::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let path = chunk.metadata.source_path.as_str();
            last_chunk.insert(path, i);
            *chunk_counts.entry(path).or_default() += 1;
        }
        let completion = |path: &str, fingerprint: Option<&String>| CompletedSource {
            source_path: path.to_string(),
            fingerprint: fingerprint.cloned(),
            chunks: chunk_counts.get(path).copied().unwrap_or(0),
        };

        let empty: Vec<CompletedSource> = group_by_source(documents)
            .into_iter()
            .filter(|(path, _)| !last_chunk.contains_key(path))
            .map(|(path, docs)| completion(path, docs[0].metadata.fingerprint.as_ref()))
            .collect();
        if !empty.is_empty() {
            debug!("{} source(s) have no chunks to index", empty.len());
            self.store.commit_batch(&[], &empty)?;
        }

        if chunks.is_empty() {
            info!("Nothing to index");
            return Ok(());
        }

        let batch_size = self.settings.batch_size.max(1);
        let batch_count = chunks.len().div_ceil(batch_size);
        info!(
            "Indexing {} chunks in {} batches into {}",
            chunks.len(),
            batch_count,
            self.store.path().display()
        );

        let progress = self.progress_bar(chunks.len() as u64);
        let retry = self.settings.retry;

        for (i, batch) in chunks.chunks(batch_size).enumerate() {
            if i > 0 && !self.settings.batch_delay.is_zero() {
                thread::sleep(self.settings.batch_delay);
            }

            let range = i * batch_size..i * batch_size + batch.len();
            let completed: Vec<CompletedSource> = batch
                .iter()
                .enumerate()
                .filter(|(j, chunk)| {
                    last_chunk.get(chunk.metadata.source_path.as_str()) == Some(&(range.start + j))
                })
                .map(|(_, chunk)| {
                    completion(
                        chunk.metadata.source_path.as_str(),
                        chunk.metadata.fingerprint.as_ref(),
                    )
                })
                .collect();

            let ids = retry
                .run(|| self.index_batch(batch, &completed), BatchError::is_retryable)
                .map_err(|exhausted| {
                    progress.abandon();
                    IngestError::BatchFailed {
                        batch: i + 1,
                        attempts: exhausted.attempts,
                        source: exhausted.error,
                    }
                })?;

            debug!(
                "Batch {}/{} (chunks {}..{}): {} entries, {} source(s) complete",
                i + 1,
                batch_count,
                range.start,
                range.end,
                ids.len(),
                completed.len()
            );
            report.added += ids.len();
            progress.inc(batch.len() as u64);
        }

        progress.finish_and_clear();
        info!("Indexed {} chunks", report.added);
        Ok(())
    }

    fn index_batch(
        &mut self,
        batch: &[Chunk],
        completed: &[CompletedSource],
    ) -> Result<Vec<i64>, BatchError> {
        let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != batch.len() {
            return Err(EmbedderError::CountMismatch {
                expected: batch.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let entries: Vec<NewEntry> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| NewEntry {
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                position: chunk.position,
                vector,
            })
            .collect();

        Ok(self.store.commit_batch(&entries, completed)?)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} chunks ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb
    }
}

/// Documents grouped by `source_path`, in first-seen order.
fn group_by_source(documents: &[Document]) -> Vec<(&str, Vec<&Document>)> {
    let mut order: Vec<(&str, Vec<&Document>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for doc in documents {
        let key = doc.metadata.source_path.as_str();
        match index.get(key) {
            Some(&i) => order[i].1.push(doc),
            None => {
                index.insert(key, order.len());
                order.push((key, vec![doc]));
            }
        }
    }
    order
}
