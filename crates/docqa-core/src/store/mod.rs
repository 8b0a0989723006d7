//! Vector store abstraction.
//!
//! The [`VectorStore`] trait defines the collection, upsert, search and
//! delete operations the ingestion pipeline and answer engine need,
//! enabling pluggable backends (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Contract
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`ensure_collection`](VectorStore::ensure_collection) | Idempotent; a dimension or metric conflict is a fatal error |
//! | [`upsert`](VectorStore::upsert) | Idempotent by `(document_id, chunk_index)` |
//! | [`search`](VectorStore::search) | At most `top_k` hits, only from `filter`; empty filter → no hits |
//! | [`delete_by_document`](VectorStore::delete_by_document) | Removes every vector of one document |
//! | [`replace_document`](VectorStore::replace_document) | Atomic swap of one document's vectors |

pub mod memory;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, l2_distance};
use crate::error::Result;
use crate::models::{ScoredChunk, VectorRecord};

/// Similarity metric, fixed per collection at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    L2,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Some(Metric::Cosine),
            "l2" => Some(Metric::L2),
            _ => None,
        }
    }

    /// Score where higher is always better: cosine similarity, or the
    /// negated Euclidean distance.
    pub fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(query, candidate),
            Metric::L2 => -l2_distance(query, candidate),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared shape of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dims: usize,
    pub metric: Metric,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dims: usize, metric: Metric) -> Self {
        Self {
            name: name.into(),
            dims,
            metric,
        }
    }
}

/// Order hits by score descending, breaking ties by ascending chunk index
/// and then document id so rankings are deterministic.
pub fn rank_hits(hits: &mut [ScoredChunk]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
}

/// Abstract vector store backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend identifier used in errors and logs.
    fn backend(&self) -> &str;

    /// Create the collection, or reuse it when name, dimension and metric
    /// all match. A conflicting existing collection is a fatal
    /// `VectorStoreError`.
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Look up a collection's declared shape.
    async fn collection(&self, name: &str) -> Result<Option<CollectionSpec>>;

    /// Insert or overwrite records keyed by `(document_id, chunk_index)`.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    /// Nearest records to `query`, restricted to documents in `filter`.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &HashSet<String>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Remove every vector of `document_id`, returning how many were removed.
    async fn delete_by_document(&self, collection: &str, document_id: &str) -> Result<u64>;

    /// Atomically replace all vectors of `document_id` with `records`.
    /// Readers observe either the old set or the new one, never a mix.
    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        records: &[VectorRecord],
    ) -> Result<()>;

    /// Number of vectors stored for `document_id`.
    async fn count(&self, collection: &str, document_id: &str) -> Result<usize>;
}
