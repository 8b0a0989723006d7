//! In-memory [`VectorStore`] implementation for tests and embedded use.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`; records are
//! keyed by `(document_id, chunk_index)` in a `BTreeMap`, which makes
//! upserts idempotent and iteration order stable. Search is brute force.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{ScoredChunk, VectorRecord};

use super::{rank_hits, CollectionSpec, VectorStore};

const BACKEND: &str = "memory";

struct MemCollection {
    spec: CollectionSpec,
    records: BTreeMap<(String, i64), VectorRecord>,
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, MemCollection>> {
        self.collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, MemCollection>> {
        self.collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn missing(collection: &str) -> RagError {
    RagError::vector_store(BACKEND, format!("collection '{}' does not exist", collection))
}

fn check_records(spec: &CollectionSpec, records: &[VectorRecord]) -> Result<()> {
    for r in records {
        if r.vector.len() != spec.dims {
            return Err(RagError::DimensionMismatch {
                expected: spec.dims,
                actual: r.vector.len(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut collections = self.write();
        match collections.get(&spec.name) {
            Some(existing) if existing.spec == *spec => Ok(()),
            Some(existing) => Err(RagError::vector_store(
                BACKEND,
                format!(
                    "collection '{}' exists with dims={} metric={}, requested dims={} metric={}",
                    spec.name, existing.spec.dims, existing.spec.metric, spec.dims, spec.metric
                ),
            )),
            None => {
                collections.insert(
                    spec.name.clone(),
                    MemCollection {
                        spec: spec.clone(),
                        records: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionSpec>> {
        Ok(self.read().get(name).map(|c| c.spec.clone()))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut collections = self.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        check_records(&coll.spec, records)?;
        for r in records {
            coll.records
                .insert((r.document_id.clone(), r.chunk_index), r.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &HashSet<String>,
    ) -> Result<Vec<ScoredChunk>> {
        if filter.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let collections = self.read();
        let coll = collections.get(collection).ok_or_else(|| missing(collection))?;
        if query.len() != coll.spec.dims {
            return Err(RagError::DimensionMismatch {
                expected: coll.spec.dims,
                actual: query.len(),
            });
        }
        let mut hits: Vec<ScoredChunk> = coll
            .records
            .values()
            .filter(|r| filter.contains(&r.document_id))
            .map(|r| ScoredChunk {
                document_id: r.document_id.clone(),
                chunk_index: r.chunk_index,
                filename: r.filename.clone(),
                start_offset: r.start_offset,
                text: r.text.clone(),
                score: coll.spec.metric.score(query, &r.vector),
            })
            .collect();
        rank_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, collection: &str, document_id: &str) -> Result<u64> {
        let mut collections = self.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = coll.records.len();
        coll.records.retain(|(doc, _), _| doc != document_id);
        Ok((before - coll.records.len()) as u64)
    }

    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        let mut collections = self.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        check_records(&coll.spec, records)?;
        if let Some(stray) = records.iter().find(|r| r.document_id != document_id) {
            return Err(RagError::vector_store(
                BACKEND,
                format!(
                    "record for document '{}' passed to replace of '{}'",
                    stray.document_id, document_id
                ),
            ));
        }
        coll.records.retain(|(doc, _), _| doc != document_id);
        for r in records {
            coll.records
                .insert((r.document_id.clone(), r.chunk_index), r.clone());
        }
        Ok(())
    }

    async fn count(&self, collection: &str, document_id: &str) -> Result<usize> {
        Ok(self
            .read()
            .get(collection)
            .map(|c| c.records.keys().filter(|(doc, _)| doc == document_id).count())
            .unwrap_or(0))
    }
}
