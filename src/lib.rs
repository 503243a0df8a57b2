//! # ragsync: document ingestion and vector retrieval
//!
//! Loads legal PDFs and wiki-derived text, splits them into overlapping
//! windows, embeds them through an external embedding service, and keeps
//! one persistent vector index per document domain that agents query for
//! cited passages.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration, environment overrides, per-domain settings
//! - **[`loader`]**: PDF, plain-text and wiki-export loaders producing [`loader::Document`]s
//! - **[`indexer`]**: Chunking, batched embed-and-index with retry, fingerprint sync
//! - **[`embedder`]**: Embedding client trait, Azure OpenAI client, deterministic mock
//! - **[`db`]**: SQLite + sqlite-vec vector store (add, delete, search)
//! - **[`retrieval`]**: Query-time retrieval and citation formatting

pub mod config;
pub mod db;
pub mod embedder;
pub mod indexer;
pub mod loader;
pub mod retrieval;
