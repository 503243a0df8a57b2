//! Chunking and batched ingestion into a [`crate::db::VectorStore`].
pub mod backoff;
pub mod chunker;
pub mod core;

pub use self::backoff::RetryPolicy;
pub use self::chunker::{Chunk, ChunkingConfig};
pub use self::core::{IngestError, IngestReport, IngestSettings, Ingestor};
