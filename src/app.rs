//! Component wiring shared by the CLI and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use docqa_core::chunk::Chunker;
use docqa_core::store::VectorStore;
use sqlx::SqlitePool;

use crate::access::{AccessResolver, OwnerAccess};
use crate::answer::{AnswerEngine, AnswerSettings};
use crate::cache::AnswerCache;
use crate::config::Config;
use crate::documents::DocumentRepo;
use crate::embedding::EmbeddingClient;
use crate::ingest::IngestionPipeline;
use crate::registry::ModelRegistry;
use crate::retry::RetryPolicy;
use crate::sqlite_store::SqliteVectorStore;
use crate::storage::StorageRouter;
use crate::{db, migrate};

/// Vector store writes are retried a couple of times on lock contention.
const STORE_RETRIES: u32 = 2;
const STORE_RETRY_BASE: Duration = Duration::from_millis(250);

/// A fully wired docqa instance.
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub docs: DocumentRepo,
    pub store: Arc<dyn VectorStore>,
    pub storage: Arc<StorageRouter>,
    pub registry: Arc<ModelRegistry>,
    pub embedder: Arc<EmbeddingClient>,
    pub pipeline: Arc<IngestionPipeline>,
    pub engine: Arc<AnswerEngine>,
}

impl App {
    /// Connect to the database, apply migrations and build every component
    /// from `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let registry = ModelRegistry::load(&config, &pool)
            .await
            .context("Failed to load model registry")?;
        let storage = StorageRouter::from_config(&config)?;

        Self::assemble(config, pool, registry, storage)
    }

    /// Build an instance from already constructed parts. The pool must be
    /// migrated.
    pub fn assemble(
        config: Config,
        pool: SqlitePool,
        registry: ModelRegistry,
        storage: StorageRouter,
    ) -> Result<Self> {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));
        Self::assemble_with_store(config, pool, registry, storage, store)
    }

    /// Like [`App::assemble`], with an explicit vector store.
    pub fn assemble_with_store(
        config: Config,
        pool: SqlitePool,
        registry: ModelRegistry,
        storage: StorageRouter,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let docs = DocumentRepo::new(pool.clone());
        let storage = Arc::new(storage);
        let registry = Arc::new(registry);
        let access: Arc<dyn AccessResolver> = Arc::new(OwnerAccess::new(docs.clone()));

        let embedder = Arc::new(EmbeddingClient::new(
            registry.clone(),
            &config.embedding,
            config.timeouts.embedding(),
        ));

        let cache = AnswerCache::from_config(&config.cache);
        let chunker = Chunker::new(config.chunking.size, config.chunking.overlap)?;
        let pipeline = Arc::new(IngestionPipeline::new(
            docs.clone(),
            store.clone(),
            storage.clone(),
            embedder.clone(),
            chunker,
            config.retrieval.metric,
            config.timeouts.clone(),
            RetryPolicy::new(STORE_RETRIES, STORE_RETRY_BASE),
            cache.clone(),
        ));

        let settings = AnswerSettings {
            top_k: config.retrieval.top_k,
            max_context_chars: config.retrieval.max_context_chars,
            chat_timeout: config.timeouts.chat(),
            chat_retry: RetryPolicy::new(
                config.chat.max_retries,
                Duration::from_millis(config.chat.retry_base_ms),
            ),
            store_timeout: config.timeouts.vector_store(),
        };
        let engine = Arc::new(AnswerEngine::new(
            docs.clone(),
            store.clone(),
            embedder.clone(),
            registry.clone(),
            access,
            cache,
            settings,
        ));

        Ok(Self {
            config,
            pool,
            docs,
            store,
            storage,
            registry,
            embedder,
            pipeline,
            engine,
        })
    }
}
