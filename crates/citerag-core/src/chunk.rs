//! Token-window text chunker.
//!
//! Splits cleaned document text into overlapping [`Chunk`]s of at most
//! `max_tokens` tokens each.
//!
//! # Tokenization
//!
//! Text is segmented on Unicode word boundaries (UAX #29). Runs of
//! whitespace are attached to the segment that follows them, so `"Hello
//! world."` becomes `["Hello", " world", "."]`. Whitespace at the very end
//! of the text forms its own token. Detokenization is plain concatenation,
//! which makes the scheme lossless: re-tokenizing a chunk's text yields
//! exactly the tokens that went into it.
//!
//! # Algorithm
//!
//! 1. Tokenize the whole text. Zero tokens produce zero chunks.
//! 2. Emit the window `[start, min(start + max_tokens, len))`.
//! 3. Stop if the window reached the end; otherwise advance `start` by
//!    `max_tokens - overlap` and repeat.
//!
//! The final window ends at the token sequence's end and may be shorter
//! than `max_tokens`. For `L` tokens this yields
//! `max(1, ceil((L - overlap) / (max_tokens - overlap)))` chunks.
//!
//! # Example
//!
//! ```rust
//! use citerag_core::chunk::Chunker;
//!
//! let chunker = Chunker::new(4, 1).unwrap();
//! let chunks = chunker.split("one two three four five six");
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "one two three four");
//! assert_eq!(chunks[1].text, " four five six");
//! ```

use anyhow::{bail, Result};
use unicode_segmentation::UnicodeSegmentation;

use crate::models::Chunk;

/// Validated chunking settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_tokens: usize,
    overlap: usize,
}

impl Chunker {
    /// Creates a chunker.
    ///
    /// # Errors
    ///
    /// Fails if `max_tokens` is zero or `overlap >= max_tokens`; a window
    /// that does not advance would never terminate.
    pub fn new(max_tokens: usize, overlap: usize) -> Result<Self> {
        if max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if overlap >= max_tokens {
            bail!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.max_tokens ({})",
                overlap,
                max_tokens
            );
        }
        Ok(Self {
            max_tokens,
            overlap,
        })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        chunk_tokens(&tokenize(text), self.max_tokens, self.overlap)
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        count_tokens(text)
    }
}

/// Splits `text` into tokens. Every token is a subslice of `text` and the
/// tokens concatenate back to `text`.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut pending_ws: Option<usize> = None;

    for (offset, segment) in text.split_word_bound_indices() {
        if segment.chars().all(char::is_whitespace) {
            pending_ws.get_or_insert(offset);
            continue;
        }
        let from = pending_ws.take().unwrap_or(offset);
        tokens.push(&text[from..offset + segment.len()]);
    }
    if let Some(from) = pending_ws {
        tokens.push(&text[from..]);
    }

    tokens
}

/// Number of tokens [`tokenize`] produces for `text`.
pub fn count_tokens(text: &str) -> usize {
    tokenize(text).len()
}

/// Splits `text` with the given window and overlap.
///
/// Callers are expected to have validated `overlap < max_tokens` (see
/// [`Chunker::new`]); an invalid pair is clamped so the window always
/// advances by at least one token.
pub fn chunk_text(text: &str, max_tokens: usize, overlap: usize) -> Vec<Chunk> {
    chunk_tokens(&tokenize(text), max_tokens, overlap)
}

fn chunk_tokens(tokens: &[&str], max_tokens: usize, overlap: usize) -> Vec<Chunk> {
    let max_tokens = max_tokens.max(1);
    let step = max_tokens.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + max_tokens).min(tokens.len());
        let window = &tokens[start..end];
        chunks.push(Chunk {
            sequence_index: chunks.len(),
            text: window.concat(),
            token_count: window.len(),
        });
        if end == tokens.len() {
            break;
        }
        start += step;
    }

    chunks
}
