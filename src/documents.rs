//! Document and QA history persistence.
//!
//! [`DocumentRepo`] owns every SQL statement touching `documents` and
//! `qa_history`. Status changes go through [`DocumentRepo::transition`],
//! a compare-and-set on the current status, so concurrent writers cannot
//! skip a state-machine edge.

use std::collections::HashSet;

use docqa_core::models::{
    Document, DocumentStatus, QaRecord, StorageMode, StorageState,
};
use docqa_core::{RagError, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

pub(crate) fn db_err(e: sqlx::Error) -> RagError {
    RagError::Database(e.to_string())
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, original_filename, storage_key, storage_mode, \
     storage_state, vector_collection_name, embedding_model, status, error_message, \
     is_deleted, created_at, updated_at";

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let mode: String = row.get("storage_mode");
    let state: String = row.get("storage_state");
    let is_deleted: i64 = row.get("is_deleted");
    let id: String = row.get("id");

    let corrupt = |field: &str, value: &str| {
        RagError::Database(format!("document {} has invalid {} '{}'", id, field, value))
    };

    Ok(Document {
        status: DocumentStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        storage_mode: StorageMode::parse(&mode).ok_or_else(|| corrupt("storage_mode", &mode))?,
        storage_state: StorageState::parse(&state)
            .ok_or_else(|| corrupt("storage_state", &state))?,
        owner_id: row.get("owner_id"),
        original_filename: row.get("original_filename"),
        storage_key: row.get("storage_key"),
        vector_collection_name: row.get("vector_collection_name"),
        embedding_model: row.get("embedding_model"),
        error_message: row.get("error_message"),
        is_deleted: is_deleted != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        id,
    })
}

/// New stored file for an existing document, applied after a successful
/// re-ingestion.
#[derive(Debug, Clone)]
pub struct FileSwap {
    pub storage_key: String,
    pub original_filename: String,
    pub storage_mode: StorageMode,
    pub storage_state: StorageState,
}

#[derive(Clone)]
pub struct DocumentRepo {
    pool: SqlitePool,
}

impl DocumentRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, original_filename, storage_key, storage_mode,
                storage_state, vector_collection_name, embedding_model, status, error_message,
                is_deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.original_filename)
        .bind(&doc.storage_key)
        .bind(doc.storage_mode.as_str())
        .bind(doc.storage_state.as_str())
        .bind(&doc.vector_collection_name)
        .bind(&doc.embedding_model)
        .bind(doc.status.as_str())
        .bind(&doc.error_message)
        .bind(doc.is_deleted as i64)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Fetch a document, including soft-deleted ones.
    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    /// Fetch a live (not soft-deleted) document or fail with
    /// [`RagError::DocumentNotFound`].
    pub async fn require(&self, id: &str) -> Result<Document> {
        match self.get(id).await? {
            Some(doc) if !doc.is_deleted => Ok(doc),
            _ => Err(RagError::DocumentNotFound(id.to_string())),
        }
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE owner_id = ? AND is_deleted = 0 ORDER BY created_at DESC, id",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_document).collect()
    }

    /// Ids of every live document owned by `owner_id`.
    pub async fn ids_for_owner(&self, owner_id: &str) -> Result<HashSet<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE owner_id = ? AND is_deleted = 0")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(ids.into_iter().collect())
    }

    /// Live, processed documents among `ids`.
    pub async fn searchable(&self, ids: &HashSet<String>) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM documents WHERE id IN ({}) AND is_deleted = 0 AND status = 'processed'",
            DOCUMENT_COLUMNS, placeholders
        );
        let mut q = sqlx::query(&sql);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_document).collect()
    }

    /// Move `id` to `to` if its current status is one of `from`.
    ///
    /// Returns `false` when the document is missing, deleted, or in a
    /// different state.
    pub async fn transition(
        &self,
        id: &str,
        from: &[DocumentStatus],
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(from.iter().all(|f| f.can_transition_to(to)));
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ?
             WHERE id = ? AND is_deleted = 0 AND status IN ({})",
            placeholders
        );
        let mut q = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(error_message)
            .bind(chrono::Utc::now().timestamp())
            .bind(id);
        for status in from {
            q = q.bind(status.as_str());
        }
        let result = q.execute(&self.pool).await.map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_storage_state(&self, id: &str, state: StorageState) -> Result<()> {
        sqlx::query("UPDATE documents SET storage_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Point the document at a newly stored file and clear any error.
    pub async fn swap_file(&self, id: &str, swap: &FileSwap) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents SET storage_key = ?, original_filename = ?, storage_mode = ?,
                storage_state = ?, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&swap.storage_key)
        .bind(&swap.original_filename)
        .bind(swap.storage_mode.as_str())
        .bind(swap.storage_state.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Returns `false` when the document was already deleted or is unknown.
    pub async fn soft_delete(&self, id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE documents SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0")
                .bind(chrono::Utc::now().timestamp())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    /// Live documents whose bytes still need object-store replication.
    pub async fn local_only(&self) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE storage_state = 'local_only' AND is_deleted = 0 ORDER BY created_at",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_document).collect()
    }

    /// Documents left `pending` or `processing` by a previous process.
    pub async fn unfinished(&self) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE status IN ('pending', 'processing') AND is_deleted = 0",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_document).collect()
    }

    pub async fn insert_history(&self, owner_id: &str, question: &str, answer: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO qa_history (owner_id, question, answer, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(owner_id)
        .bind(question)
        .bind(answer)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.last_insert_rowid())
    }

    /// Newest first.
    pub async fn history_for(&self, owner_id: &str, limit: i64) -> Result<Vec<QaRecord>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, question, answer, created_at FROM qa_history
             WHERE owner_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| QaRecord {
                id: row.get("id"),
                owner_id: row.get("owner_id"),
                question: row.get("question"),
                answer: row.get("answer"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn history_count(&self, owner_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM qa_history WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}
