//! Retrieval helpers for the answer engine.
//!
//! Pure functions: merging per-collection hits into one ranking,
//! fitting the ranking into a character budget, and deriving the answer
//! cache key from a question and the caller's accessible document set.
//!
//! # Context assembly
//!
//! Hits are taken in rank order and joined with [`CONTEXT_SEPARATOR`]
//! until the next hit would exceed `max_chars`; that hit and every
//! lower-ranked one are dropped. The top hit is always kept, cut to the
//! budget if it alone is too long.

use std::collections::HashSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::ScoredChunk;
use crate::store::rank_hits;

/// Joins chunk texts inside the assembled context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Provenance of one chunk used to answer a question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRef {
    pub document_id: String,
    pub chunk_index: i64,
    pub filename: String,
    pub score: f32,
}

impl From<&ScoredChunk> for ChunkRef {
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            document_id: hit.document_id.clone(),
            chunk_index: hit.chunk_index,
            filename: hit.filename.clone(),
            score: hit.score,
        }
    }
}

/// Assembled prompt context and the hits it was built from, in rank order.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub text: String,
    pub used: Vec<ScoredChunk>,
}

/// Merge hit lists from several collections and keep the best `top_k`.
pub fn merge_hits(lists: Vec<Vec<ScoredChunk>>, top_k: usize) -> Vec<ScoredChunk> {
    let mut all: Vec<ScoredChunk> = lists.into_iter().flatten().collect();
    rank_hits(&mut all);
    all.truncate(top_k);
    all
}

/// Fit ranked `hits` into `max_chars` characters.
pub fn assemble_context(hits: Vec<ScoredChunk>, max_chars: usize) -> ContextWindow {
    let sep_len = CONTEXT_SEPARATOR.chars().count();
    let mut text = String::new();
    let mut used_chars = 0usize;
    let mut used = Vec::new();

    for hit in hits {
        let len = hit.text.chars().count();
        if used.is_empty() {
            if len > max_chars {
                text.extend(hit.text.chars().take(max_chars));
            } else {
                text.push_str(&hit.text);
            }
            used_chars = len.min(max_chars);
            used.push(hit);
            continue;
        }
        if used_chars + sep_len + len > max_chars {
            break;
        }
        text.push_str(CONTEXT_SEPARATOR);
        text.push_str(&hit.text);
        used_chars += sep_len + len;
        used.push(hit);
    }

    ContextWindow { text, used }
}

/// Normalize a question for cache lookups: trimmed, lower-cased, with
/// runs of whitespace collapsed to one space.
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Order-independent SHA-256 fingerprint of an accessible document set.
pub fn access_fingerprint(ids: &HashSet<String>) -> String {
    let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
