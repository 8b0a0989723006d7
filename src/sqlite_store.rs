//! SQLite-backed [`VectorStore`].
//!
//! Collections are rows in `vector_collections`; vectors are rows in
//! `vectors` keyed by `(collection, document_id, chunk_index)` with the
//! embedding stored as a little-endian f32 BLOB. Search loads the
//! filtered candidates and scores them in process with the collection's
//! metric. Replacement runs in a single transaction, so readers see either
//! the old vector set or the new one.

use std::collections::HashSet;

use async_trait::async_trait;
use docqa_core::embedding::{blob_to_vec, vec_to_blob};
use docqa_core::models::{ScoredChunk, VectorRecord};
use docqa_core::store::{rank_hits, CollectionSpec, Metric, VectorStore};
use docqa_core::{RagError, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

const BACKEND: &str = "sqlite";

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn store_err(e: sqlx::Error) -> RagError {
    let transient = matches!(
        e,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
    ) || e.to_string().contains("database is locked");
    RagError::VectorStoreError {
        backend: BACKEND.to_string(),
        message: e.to_string(),
        transient,
    }
}

fn missing(collection: &str) -> RagError {
    RagError::vector_store(BACKEND, format!("collection '{}' does not exist", collection))
}

impl SqliteVectorStore {
    async fn require(&self, collection: &str) -> Result<CollectionSpec> {
        self.collection(collection)
            .await?
            .ok_or_else(|| missing(collection))
    }

    async fn insert_records(
        tx: &mut Transaction<'_, Sqlite>,
        collection: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO vectors (collection, document_id, chunk_index, filename, start_offset, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, document_id, chunk_index) DO UPDATE SET
                    filename = excluded.filename,
                    start_offset = excluded.start_offset,
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection)
            .bind(&r.document_id)
            .bind(r.chunk_index)
            .bind(&r.filename)
            .bind(r.start_offset)
            .bind(&r.text)
            .bind(vec_to_blob(&r.vector))
            .execute(&mut **tx)
            .await
            .map_err(store_err)?;
        }
        Ok(())
    }
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
impl VectorStore for SqliteVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        sqlx::query(
            "INSERT INTO vector_collections (name, dims, metric, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&spec.name)
        .bind(spec.dims as i64)
        .bind(spec.metric.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let existing = self.require(&spec.name).await?;
        if existing != *spec {
            return Err(RagError::vector_store(
                BACKEND,
                format!(
                    "collection '{}' exists with dims={} metric={}, requested dims={} metric={}",
                    spec.name, existing.dims, existing.metric, spec.dims, spec.metric
                ),
            ));
        }
        Ok(())
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionSpec>> {
        let row = sqlx::query("SELECT name, dims, metric FROM vector_collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let metric_str: String = row.get("metric");
        let metric = Metric::parse(&metric_str).ok_or_else(|| {
            RagError::vector_store(
                BACKEND,
                format!("collection '{}' has unknown metric '{}'", name, metric_str),
            )
        })?;
        let dims: i64 = row.get("dims");
        Ok(Some(CollectionSpec {
            name: row.get("name"),
            dims: dims as usize,
            metric,
        }))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let spec = self.require(collection).await?;
        check_records(&spec, records)?;

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        Self::insert_records(&mut tx, collection, records).await?;
        tx.commit().await.map_err(store_err)?;
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
        let spec = self.require(collection).await?;
        if query.len() != spec.dims {
            return Err(RagError::DimensionMismatch {
                expected: spec.dims,
                actual: query.len(),
            });
        }

        let placeholders = vec!["?"; filter.len()].join(", ");
        let sql = format!(
            "SELECT document_id, chunk_index, filename, start_offset, text, embedding
             FROM vectors WHERE collection = ? AND document_id IN ({})",
            placeholders
        );
        let mut q = sqlx::query(&sql).bind(collection);
        for id in filter {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(store_err)?;

        let mut hits: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    filename: row.get("filename"),
                    start_offset: row.get("start_offset"),
                    text: row.get("text"),
                    score: spec.metric.score(query, &blob_to_vec(&blob)),
                }
            })
            .collect();
        rank_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, collection: &str, document_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vectors WHERE collection = ? AND document_id = ?")
            .bind(collection)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        let spec = self.require(collection).await?;
        check_records(&spec, records)?;
        if let Some(stray) = records.iter().find(|r| r.document_id != document_id) {
            return Err(RagError::vector_store(
                BACKEND,
                format!(
                    "record for document '{}' passed to replace of '{}'",
                    stray.document_id, document_id
                ),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query("DELETE FROM vectors WHERE collection = ? AND document_id = ?")
            .bind(collection)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        Self::insert_records(&mut tx, collection, records).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn count(&self, collection: &str, document_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vectors WHERE collection = ? AND document_id = ?",
        )
        .bind(collection)
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(n as usize)
    }
}
