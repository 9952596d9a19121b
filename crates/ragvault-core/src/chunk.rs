//! Sliding-window text chunker with overlap.
//!
//! Splits document text into [`TextChunk`]s of at most `max_size`
//! characters, overlapping consecutive windows by `overlap` characters so that
//! sentences straddling a boundary remain retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Collapse every run of whitespace to a single space and trim. This is
//!    unconditional; callers never need to pre-normalize.
//! 2. Take a window of `max_size` chars starting at offset 0.
//! 3. If the window does not reach the end of the text, look backward from
//!    its right edge for the nearest sentence terminator (`.`, `!`, `?`) or
//!    space and cut there, so words are not split. A break is only accepted
//!    past `start + overlap`; otherwise the window is cut at exactly
//!    `max_size`.
//! 4. The next window starts at `cut - overlap`.
//! 5. Empty segments are dropped; ordinals stay contiguous.
//!
//! When `overlap >= max_size` the overlap is clamped to `max_size / 2`.
//! Every step therefore advances the window start, and the loop finishes in
//! `O(len / max_size)` iterations.
//!
//! All lengths are counted in `char`s, so multi-byte text is never split
//! inside a code point.
//!
//! # Example
//!
//! ```rust
//! use ragvault_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello   world.\n\nSecond line.", 1000, 150).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Hello world. Second line.");
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};
use crate::models::TextChunk;

/// Default window size in characters.
pub const DEFAULT_MAX_CHARS: usize = 1000;
/// Default overlap between consecutive windows in characters.
pub const DEFAULT_OVERLAP_CHARS: usize = 150;

/// Chunking parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

impl ChunkingParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(VaultError::configuration("chunking.max_chars must be > 0"));
        }
        Ok(())
    }

    pub fn chunk(&self, text: &str) -> Result<Vec<TextChunk>> {
        chunk_text(text, self.max_chars, self.overlap_chars)
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into overlapping windows of at most `max_size` chars.
///
/// # Errors
///
/// Returns [`VaultError::Configuration`] when `max_size` is zero.
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    if max_size == 0 {
        return Err(VaultError::configuration("chunking.max_chars must be > 0"));
    }

    let normalized = normalize_whitespace(text);
    let chars: Vec<char> = normalized.chars().collect();
    let len = chars.len();

    if len == 0 {
        return Ok(Vec::new());
    }
    if len <= max_size {
        return Ok(vec![make_chunk(0, &normalized, 0)]);
    }

    let overlap = effective_overlap(max_size, overlap);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        // Normalized text is trimmed with single spaces, so one step skips
        // the separator and `start` is where the chunk text really begins.
        if chars[start] == ' ' {
            start += 1;
        }
        let edge = (start + max_size).min(len);
        let cut = if edge < len {
            find_cut(&chars, start, edge, overlap)
        } else {
            len
        };

        let piece: String = chars[start..cut].iter().collect();
        let piece = piece.trim_end();
        if !piece.is_empty() {
            chunks.push(make_chunk(chunks.len() as u32, piece, start));
        }

        if cut >= len {
            break;
        }
        // find_cut only returns positions past start + overlap.
        start = cut - overlap;
    }

    Ok(chunks)
}

fn effective_overlap(max_size: usize, overlap: usize) -> usize {
    if overlap >= max_size {
        max_size / 2
    } else {
        overlap
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// Pick the cut position for the window `[start, edge)`, with `edge < len`.
fn find_cut(chars: &[char], start: usize, edge: usize, overlap: usize) -> usize {
    if chars[edge] == ' ' {
        return edge;
    }
    let floor = start + overlap;
    for i in (floor..edge).rev() {
        let c = chars[i];
        if is_terminator(c) {
            return i + 1;
        }
        if c == ' ' && i > floor {
            return i;
        }
    }
    edge
}

/// Create a [`TextChunk`] with a SHA-256 content hash.
fn make_chunk(ordinal: u32, text: &str, start: usize) -> TextChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    TextChunk {
        ordinal,
        text: text.to_string(),
        start,
        hash,
    }
}
