//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docqa::app::App;
use docqa::config::{parse_config, Config};
use docqa::registry::ModelRegistry;
use docqa::sqlite_store::SqliteVectorStore;
use docqa::storage::{LocalStorage, StorageRouter};
use docqa::{db, migrate};
use docqa_core::chat::{ChatBackend, ChatMessage};
use docqa_core::embedding::EmbeddingBackend;
use docqa_core::models::{ScoredChunk, StorageMode, VectorRecord};
use docqa_core::storage::{SaveOutcome, StorageBackend};
use docqa_core::store::{CollectionSpec, VectorStore};
use docqa_core::{RagError, Result};
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const VOCABULARY: [&str; 3] = ["apple", "mango", "grape"];

/// Bag-of-keywords embedder: one component per [`VOCABULARY`] word plus a
/// constant bias component.
///
/// Inputs containing `venom` are rejected. Inputs containing `sloth` wait
/// on [`KeywordEmbedder::gate`] before answering.
pub struct KeywordEmbedder {
    name: String,
    extra_dims: usize,
    pub calls: AtomicUsize,
    pub gate: Semaphore,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::named("keywords", 0)
    }

    /// Same embedding padded with `extra_dims` zero components.
    pub fn named(name: &str, extra_dims: usize) -> Self {
        Self {
            name: name.to_string(),
            extra_dims,
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1_000);
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = VOCABULARY
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        v.push(1.0);
        v.extend(std::iter::repeat(0.0).take(self.extra_dims));
        v
    }
}

#[async_trait]
impl EmbeddingBackend for KeywordEmbedder {
    fn provider(&self) -> &str {
        "fake"
    }
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        VOCABULARY.len() + 1 + self.extra_dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains("sloth")) {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| RagError::embedding("fake", "gate closed"))?;
        }
        if texts.iter().any(|t| t.contains("venom")) {
            return Err(RagError::embedding("fake", "input rejected"));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Chat backend that records prompts and answers with a fixed prefix.
#[derive(Default)]
pub struct RecordingChat {
    pub calls: AtomicUsize,
    pub last_user_prompt: Mutex<Option<String>>,
}

#[async_trait]
impl ChatBackend for RecordingChat {
    fn provider(&self) -> &str {
        "fake"
    }
    fn model_name(&self) -> &str {
        "recording"
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let prompt = messages.last().map(|m| m.content.clone());
        *self.last_user_prompt.lock().unwrap() = prompt;
        Ok(format!("answer #{}", n))
    }
}

/// In-memory object store that can be switched off.
#[derive(Default)]
pub struct FlakyObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub down: AtomicBool,
}

impl FlakyObjectStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(RagError::storage("object", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyObjectStore {
    fn kind(&self) -> &str {
        "object"
    }
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<SaveOutcome> {
        self.check()?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(SaveOutcome::Stored)
    }
    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.check()?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| RagError::storage("object", format!("no such key: {}", key)))
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.objects.lock().unwrap().remove(key).is_some())
    }
    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
    async fn available(&self) -> bool {
        self.check().is_ok()
    }
}

/// SQLite vector store that records how it is driven.
///
/// `replace_document` calls block on [`InstrumentedStore::replace_gate`]
/// while `hold_replaces` is set. `delete_by_document` fails while
/// `fail_deletes` is set.
pub struct InstrumentedStore {
    inner: SqliteVectorStore,
    replacing: AtomicUsize,
    pub replace_calls: AtomicUsize,
    pub max_concurrent_replaces: AtomicUsize,
    pub hold_replaces: AtomicBool,
    pub replace_gate: Semaphore,
    pub fail_deletes: AtomicBool,
    pub search_filter_sizes: Mutex<Vec<usize>>,
}

impl InstrumentedStore {
    pub fn new(inner: SqliteVectorStore) -> Self {
        Self {
            inner,
            replacing: AtomicUsize::new(0),
            replace_calls: AtomicUsize::new(0),
            max_concurrent_replaces: AtomicUsize::new(0),
            hold_replaces: AtomicBool::new(false),
            replace_gate: Semaphore::new(0),
            fail_deletes: AtomicBool::new(false),
            search_filter_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn release_replaces(&self) {
        self.replace_gate.add_permits(1_000);
    }
}

#[async_trait]
impl VectorStore for InstrumentedStore {
    fn backend(&self) -> &str {
        self.inner.backend()
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        self.inner.ensure_collection(spec).await
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionSpec>> {
        self.inner.collection(name).await
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        self.inner.upsert(collection, records).await
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &HashSet<String>,
    ) -> Result<Vec<ScoredChunk>> {
        self.search_filter_sizes.lock().unwrap().push(filter.len());
        self.inner.search(collection, query, top_k, filter).await
    }

    async fn delete_by_document(&self, collection: &str, document_id: &str) -> Result<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(RagError::vector_store("instrumented", "disk I/O error"));
        }
        self.inner.delete_by_document(collection, document_id).await
    }

    async fn replace_document(
        &self,
        collection: &str,
        document_id: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.replacing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_replaces.fetch_max(now, Ordering::SeqCst);
        if self.hold_replaces.load(Ordering::SeqCst) {
            if let Ok(permit) = self.replace_gate.acquire().await {
                drop(permit);
            }
        }
        let result = self
            .inner
            .replace_document(collection, document_id, records)
            .await;
        self.replacing.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn count(&self, collection: &str, document_id: &str) -> Result<usize> {
        self.inner.count(collection, document_id).await
    }
}

pub fn test_config(root: &Path) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "{root}/data/docqa.sqlite"

[chunking]
size = 500
overlap = 50

[retrieval]
top_k = 3

[embedding]
batch_size = 1
max_concurrency = 2
max_retries = 1
retry_base_ms = 1

[chat]
max_retries = 0
retry_base_ms = 1

[storage.local]
root = "{root}/uploads"
"#,
        root = root.display()
    ))
    .unwrap()
}

pub struct Harness {
    pub tmp: TempDir,
    pub app: App,
    pub embedder: Arc<KeywordEmbedder>,
    pub chat: Arc<RecordingChat>,
    pub object: Arc<FlakyObjectStore>,
    pub store: Arc<InstrumentedStore>,
}

pub async fn harness() -> Harness {
    harness_with(StorageMode::Local, Vec::new()).await
}

/// Build an [`App`] over a temp directory with fake backends. `extra`
/// embedders are registered after the default one.
pub async fn harness_with(mode: StorageMode, extra: Vec<Arc<KeywordEmbedder>>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let embedder = Arc::new(KeywordEmbedder::new());
    let chat = Arc::new(RecordingChat::default());
    let mut registry = ModelRegistry::new();
    registry.register_embedding(embedder.clone());
    for e in extra {
        registry.register_embedding(e);
    }
    registry.register_chat(chat.clone());

    let object = Arc::new(FlakyObjectStore::default());
    let local: Arc<dyn StorageBackend> =
        Arc::new(LocalStorage::new(config.storage.local.root.clone()));
    let remote: Arc<dyn StorageBackend> = object.clone();
    let storage = StorageRouter::new(mode, local, Some(remote));

    let store = Arc::new(InstrumentedStore::new(SqliteVectorStore::new(pool.clone())));
    let vectors: Arc<dyn VectorStore> = store.clone();
    let app = App::assemble_with_store(config, pool, registry, storage, vectors).unwrap();
    Harness {
        tmp,
        app,
        embedder,
        chat,
        object,
        store,
    }
}

/// `word` repeated to exactly `n` five-letter words.
pub fn words(word: &str, n: usize) -> String {
    assert_eq!(word.len(), 5);
    word.repeat(n)
}
