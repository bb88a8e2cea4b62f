//! Document Chunking
//!
//! Splits a document into bounded, overlapping spans for embedding.
//! Sizes and offsets are counted in characters, never bytes, so a chunk
//! boundary can't land inside a multi-byte code point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::loader::Document;

/// Preferred split points, strongest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("Chunk size must be greater than zero")]
    ZeroSize,
    #[error("Overlap ({overlap}) must be smaller than the chunk size ({max_size})")]
    OverlapTooLarge { overlap: usize, max_size: usize },
}

/// A chunk of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Id of the parent Document
    pub document_id: String,
    pub source: String,
    pub page: Option<u32>,
    /// Position within the parent document (0-indexed)
    pub ordinal: u32,
    /// Start position in the document text (chars, inclusive)
    pub start: usize,
    /// End position in the document text (chars, exclusive)
    pub end: usize,
    /// First char not shared with the previous chunk
    pub owned_start: usize,
    pub content: String,
}

/// Split one document into chunks of at most `max_size` chars, adjacent
/// chunks sharing exactly `overlap` chars.
pub fn split(document: &Document, max_size: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkerError> {
    if max_size == 0 {
        return Err(ChunkerError::ZeroSize);
    }
    if overlap >= max_size {
        return Err(ChunkerError::OverlapTooLarge { overlap, max_size });
    }

    let text = document.text.as_str();
    // Byte offset of every char, plus the end of the text.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;
    if total == 0 {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::with_capacity(total.div_ceil(max_size - overlap));
    let mut start = 0usize;
    let mut owned_start = 0usize;

    loop {
        let window_end = (start + max_size).min(total);
        let end = if window_end == total {
            total
        } else {
            find_boundary(text, &offsets, start, window_end, max_size, overlap).unwrap_or(window_end)
        };

        chunks.push(Chunk {
            document_id: document.id.clone(),
            source: document.source.clone(),
            page: document.page,
            ordinal: chunks.len() as u32,
            start,
            end,
            owned_start,
            content: text[offsets[start]..offsets[end]].to_string(),
        });

        if end == total {
            break;
        }
        // end > start + overlap, so this always advances
        owned_start = end;
        start = end - overlap;
    }

    Ok(chunks)
}

/// Split a set of documents, preserving document order.
pub fn split_all(documents: &[Document], max_size: usize, overlap: usize) -> Result<Vec<Chunk>, ChunkerError> {
    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(split(document, max_size, overlap)?);
    }
    Ok(chunks)
}

/// Find a natural split point in the latter half of the window `[start, window_end)`.
/// Returns the char index just past the separator.
fn find_boundary(
    text: &str,
    offsets: &[usize],
    start: usize,
    window_end: usize,
    max_size: usize,
    overlap: usize,
) -> Option<usize> {
    let min_end = (start + overlap + 1).max(start + max_size / 2);
    let window = &text[offsets[start]..offsets[window_end]];

    for sep in SEPARATORS {
        let Some(pos) = window.rfind(sep) else {
            continue;
        };
        let byte_end = offsets[start] + pos + sep.len();
        // separators are ASCII, so byte_end always sits on a char boundary
        let Ok(candidate) = offsets.binary_search(&byte_end) else {
            continue;
        };
        if candidate >= min_end {
            return Some(candidate);
        }
    }
    None
}
