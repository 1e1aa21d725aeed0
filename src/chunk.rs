//! Recursive separator text chunker.
//!
//! Splits a document's text into overlapping [`Chunk`]s of at most
//! `max_size` characters. Splitting tries the coarsest separator first
//! (paragraph break), and only pieces that are still too long are split
//! again with the next-finer separator (line break, sentence end, word
//! space, and finally single characters).
//!
//! # Algorithm
//!
//! 1. Cut the text into pieces with the separator cascade. Separators stay
//!    attached to the end of the piece they terminate, so pieces tile the
//!    text exactly.
//! 2. Merge pieces greedily into chunks while the chunk stays within
//!    `max_size` characters.
//! 3. Start each following chunk at the earliest piece boundary inside the
//!    last `overlap` characters of the previous chunk that still leaves room
//!    for the next piece.
//!
//! Dropping each chunk's leading `overlap` characters and concatenating the
//! rest reproduces the input text. A piece that is still longer than
//! `max_size` once the cascade is exhausted is emitted whole and flagged as
//! [`Chunk::oversized`].
//!
//! # Example
//!
//! ```rust
//! use concept_coder::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(1500, 300);
//! let chunks = chunk_text("memo.txt", "Hello world.\n\nSecond paragraph.", &params).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].overlap, 0);
//! ```

use tracing::warn;

use crate::error::{CoderError, Result};
use crate::models::Chunk;

/// Paragraph, line, sentence, word, character.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkParams {
    /// Maximum chunk length in characters.
    pub max_size: usize,
    /// Characters shared between adjacent chunks.
    pub overlap: usize,
    /// Separator cascade, coarsest first. `""` splits between characters.
    pub separators: Vec<String>,
}

impl ChunkParams {
    pub fn new(max_size: usize, overlap: usize) -> Self {
        Self {
            max_size,
            overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CoderError::config("chunk size must be > 0"));
        }
        if self.overlap >= self.max_size {
            return Err(CoderError::config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.max_size
            )));
        }
        Ok(())
    }
}

/// Byte range of the source text plus its length in characters.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

/// Split `text` into overlapping chunks tagged with `source`.
///
/// Returns an empty vector for empty text. Fails with
/// [`CoderError::Configuration`] when `overlap >= max_size`.
pub fn chunk_text(source: &str, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>> {
    params.validate()?;

    let mut pieces = Vec::new();
    split_pieces(
        text,
        0,
        text.len(),
        &params.separators,
        params.max_size,
        &mut pieces,
    );

    let max = params.max_size;
    let mut chunks = Vec::new();
    let mut first = 0usize;
    let mut overlap = 0usize;

    while first < pieces.len() {
        let mut last = first;
        let mut size = 0usize;
        while last < pieces.len() && (last == first || size + pieces[last].chars <= max) {
            size += pieces[last].chars;
            last += 1;
        }

        let start = pieces[first].start;
        let end = pieces[last - 1].end;
        let oversized = size > max;
        if oversized {
            warn!(
                source,
                chunk = chunks.len(),
                chars = size,
                max,
                "chunk exceeds chunk_size: no split point inside this unit"
            );
        }
        chunks.push(Chunk {
            index: chunks.len(),
            source: source.to_string(),
            text: text[start..end].to_string(),
            start,
            overlap,
            oversized,
        });

        if last == pieces.len() {
            break;
        }

        // Walk back from the end of this chunk to find where the next one starts.
        let next = pieces[last].chars;
        let mut boundary = last;
        let mut tail = 0usize;
        while boundary > first + 1 {
            let c = pieces[boundary - 1].chars;
            if tail + c > params.overlap || tail + c + next > max {
                break;
            }
            tail += c;
            boundary -= 1;
        }
        first = boundary;
        overlap = tail;
    }

    Ok(chunks)
}

/// Convenience form returning only the chunk texts.
pub fn split_text(text: &str, max_size: usize, overlap: usize) -> Result<Vec<String>> {
    let params = ChunkParams::new(max_size, overlap);
    Ok(chunk_text("", text, &params)?
        .into_iter()
        .map(|c| c.text)
        .collect())
}

fn split_pieces(
    text: &str,
    start: usize,
    end: usize,
    separators: &[String],
    max: usize,
    out: &mut Vec<Piece>,
) {
    if start == end {
        return;
    }
    let slice = &text[start..end];
    let chars = slice.chars().count();
    if chars <= max {
        out.push(Piece { start, end, chars });
        return;
    }

    let Some((sep, finer)) = separators.split_first() else {
        out.push(Piece { start, end, chars });
        return;
    };

    if sep.is_empty() {
        for (offset, c) in slice.char_indices() {
            out.push(Piece {
                start: start + offset,
                end: start + offset + c.len_utf8(),
                chars: 1,
            });
        }
        return;
    }

    let mut cursor = 0usize;
    for (pos, matched) in slice.match_indices(sep.as_str()) {
        let piece_end = pos + matched.len();
        split_pieces(text, start + cursor, start + piece_end, finer, max, out);
        cursor = piece_end;
    }
    split_pieces(text, start + cursor, end, finer, max, out);
}
