use serde::{Deserialize, Serialize};

use crate::loader::{Document, Metadata};

/// Window size and overlap, both counted in `char`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    /// Small windows for statute text, so citations stay precise.
    pub const LEGAL: Self = Self {
        chunk_size: 1000,
        chunk_overlap: 200,
    };

    /// Wide windows for operational documentation.
    pub const SETTLEMENT: Self = Self {
        chunk_size: 2000,
        chunk_overlap: 100,
    };

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            self.chunk_overlap,
            self.chunk_size
        );
        Ok(())
    }
}

/// A window of a source document. Inherits the document's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: Metadata,
    /// Ordinal of this chunk within its document.
    pub position: usize,
}

/// Natural break points, from the coarsest to the finest.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Boundary {
    const ORDER: [Boundary; 4] = [
        Boundary::Paragraph,
        Boundary::Line,
        Boundary::Sentence,
        Boundary::Word,
    ];

    /// Whether `window` ends right after a break of this kind.
    fn ends_at(self, window: &[char]) -> bool {
        let n = window.len();
        let last = match window.last() {
            Some(c) => *c,
            None => return false,
        };
        let prev = if n >= 2 { Some(window[n - 2]) } else { None };

        match self {
            Boundary::Paragraph => last == '\n' && prev == Some('\n'),
            Boundary::Line => last == '\n',
            Boundary::Sentence => {
                matches!(last, '。' | '！' | '？')
                    || (last.is_whitespace() && matches!(prev, Some('.' | '!' | '?')))
            }
            Boundary::Word => last.is_whitespace(),
        }
    }
}

/// Split `documents` into overlapping windows, one run per document.
pub fn chunk_documents(documents: &[Document], config: ChunkingConfig) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| {
            split_text(&doc.content, config.chunk_size, config.chunk_overlap)
                .into_iter()
                .enumerate()
                .map(|(position, content)| Chunk {
                    content,
                    metadata: doc.metadata.clone(),
                    position,
                })
        })
        .collect()
}

/// Drop chunks whose trimmed length is below `min_chars`, keeping order.
pub fn filter_short(chunks: Vec<Chunk>, min_chars: usize) -> Vec<Chunk> {
    chunks
        .into_iter()
        .filter(|c| c.content.trim().chars().count() >= min_chars)
        .collect()
}

/// Splits text into windows of at most `chunk_size` characters.
///
/// Each window ends at the coarsest natural break found in its second
/// half (paragraph, then line, then sentence, then word), or at exactly
/// `chunk_size` when there is none. The next window starts
/// `chunk_overlap` characters before the previous one ended, so adjacent
/// windows always share exactly `chunk_overlap` characters.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let overlap = chunk_overlap.min(chunk_size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        if chars.len() - start <= chunk_size {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let end = find_window_end(&chars, start, chunk_size, overlap);
        chunks.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    chunks
}

fn find_window_end(chars: &[char], start: usize, chunk_size: usize, overlap: usize) -> usize {
    let hard_end = start + chunk_size;
    // Ending at or before start + overlap would not advance the next window.
    let floor = start + (chunk_size / 2).max(overlap + 1);

    for boundary in Boundary::ORDER {
        for end in (floor..=hard_end).rev() {
            if boundary.ends_at(&chars[start..end]) {
                return end;
            }
        }
    }

    hard_end
}
