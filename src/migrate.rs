use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table and index. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            storage_mode TEXT NOT NULL,
            storage_state TEXT NOT NULL DEFAULT 'redundant',
            vector_collection_name TEXT NOT NULL UNIQUE,
            embedding_model TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create QA history table (append-only)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qa_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create model configuration table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS llm_models (
            name TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            provider TEXT,
            api_key TEXT,
            base_url TEXT,
            dims INTEGER,
            params_json TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 1,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create vector collections table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            metric TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create vectors table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            collection TEXT NOT NULL,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            filename TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, document_id, chunk_index),
            FOREIGN KEY (collection) REFERENCES vector_collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_storage_state ON documents(storage_state)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_qa_history_owner ON qa_history(owner_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_document ON vectors(document_id)")
        .execute(pool)
        .await?;

    Ok(())
}
