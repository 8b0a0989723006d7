//! Overlapping fixed-size text chunker.
//!
//! Splits extracted document text into [`ChunkSpan`]s of at most `size`
//! characters, where each span after the first begins with the last
//! `overlap` characters of its predecessor.
//!
//! # Algorithm
//!
//! 1. If the rest of the text fits in `size` characters, emit it and stop.
//! 2. Otherwise look back from the hard limit over a window of `size / 5`
//!    characters for a whitespace character and end the span just after
//!    it. A break is only taken if the span stays longer than `overlap`,
//!    so every span contributes new text.
//! 3. Without whitespace in the window, cut at exactly `size` characters.
//! 4. The next span starts `overlap` characters before the end of this one.
//!
//! Sizes are counted in Unicode scalar values; offsets are byte offsets
//! into the input, so a span can always be sliced back out of the text.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::chunk_text;
//!
//! let spans: Vec<_> = chunk_text("alpha beta gamma delta", 12, 4).unwrap().collect();
//! assert_eq!(spans[0].text, "alpha beta ");
//! assert_eq!(spans[1].start, 7);
//! ```

use std::iter::FusedIterator;

use crate::error::{RagError, Result};

/// One chunk of text and its byte offset in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan<'a> {
    pub text: &'a str,
    pub start: usize,
}

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Fails with [`RagError::InvalidConfig`] unless `0 <= overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if overlap >= size {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily chunk `text`. Calling this again restarts from the beginning.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            text,
            size: self.size,
            overlap: self.overlap,
            pos: 0,
            done: false,
        }
    }
}

/// Chunk `text` into spans of at most `size` characters overlapping by
/// `overlap` characters.
///
/// Text shorter than `size`, including empty text, yields exactly one span.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Chunks<'_>> {
    Ok(Chunker::new(size, overlap)?.chunks(text))
}

/// Iterator returned by [`chunk_text`] and [`Chunker::chunks`].
///
/// Cloning the iterator snapshots its position, so a partially consumed
/// sequence can be replayed.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    size: usize,
    overlap: usize,
    pos: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    /// Pick the span length in characters, preferring to end right after
    /// a whitespace character near the hard limit.
    ///
    /// `bounds[k]` is the byte offset of the k-th character of `rest`.
    fn break_point(&self, rest: &str, bounds: &[usize]) -> usize {
        let floor = (self.size - self.size / 5).max(self.overlap + 1);
        for n in (floor..=self.size).rev() {
            let last = &rest[bounds[n - 1]..bounds[n]];
            if last.chars().next().is_some_and(char::is_whitespace) {
                return n;
            }
        }
        self.size
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = ChunkSpan<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let rest = &self.text[self.pos..];
        let bounds: Vec<usize> = rest
            .char_indices()
            .map(|(i, _)| i)
            .take(self.size + 1)
            .collect();

        if bounds.len() <= self.size {
            self.done = true;
            return Some(ChunkSpan {
                text: rest,
                start: self.pos,
            });
        }

        let n = self.break_point(rest, &bounds);
        let span = ChunkSpan {
            text: &rest[..bounds[n]],
            start: self.pos,
        };
        self.pos += bounds[n - self.overlap];
        Some(span)
    }
}

impl FusedIterator for Chunks<'_> {}
