//! Document ingestion pipeline.
//!
//! ```text
//! upload → save bytes → pending ──spawn──▶ processing → load → extract
//!                                            → chunk → embed → replace vectors → processed
//!                                            (any step fails → failed + message)
//! ```
//!
//! Every ingestion runs as its own tokio task, registered in an
//! [`IngestTracker`] keyed by document id. At most one task (first
//! ingestion, retry, update or delete) holds a document at a time; a
//! second request is rejected with [`RagError::IngestionInProgress`].
//!
//! Re-ingestion of a `processed` document stages the complete new vector
//! set before touching anything. Until the swap, the old vectors stay
//! searchable and the status stays `processed`; a staging failure leaves
//! vectors, status and stored file exactly as they were. Cancelling an
//! update only reaches the staging phase; once the swap starts it runs to
//! completion while still holding the document's claim.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use docqa_core::chunk::Chunker;
use docqa_core::models::{
    collection_name_for, Document, DocumentStatus, StorageMode, StorageState, VectorRecord,
};
use docqa_core::storage::{new_storage_key, SaveOutcome, StorageBackend};
use docqa_core::store::{CollectionSpec, Metric, VectorStore};
use docqa_core::{RagError, Result};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::AnswerCache;
use crate::config::TimeoutsConfig;
use crate::documents::{DocumentRepo, FileSwap};
use crate::embedding::EmbeddingClient;
use crate::extract::extract_text;
use crate::retry::{with_timeout, RetryPolicy};
use crate::storage::StorageRouter;

// ═══════════════════════════════════════════════════════════════════════
// Task tracking
// ═══════════════════════════════════════════════════════════════════════

struct Slot {
    abort: Option<AbortHandle>,
    done: watch::Receiver<()>,
}

/// In-flight ingestion tasks by document id.
#[derive(Clone, Default)]
pub struct IngestTracker {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

/// Exclusive claim on a document. Released on drop, including when the
/// owning task is aborted.
pub struct IngestGuard {
    id: String,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    _done: watch::Sender<()>,
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        lock(&self.slots).remove(&self.id);
    }
}

fn lock(slots: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IngestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&self, id: &str) -> Result<IngestGuard> {
        let mut slots = lock(&self.slots);
        if slots.contains_key(id) {
            return Err(RagError::IngestionInProgress(id.to_string()));
        }
        let (tx, rx) = watch::channel(());
        slots.insert(
            id.to_string(),
            Slot {
                abort: None,
                done: rx,
            },
        );
        Ok(IngestGuard {
            id: id.to_string(),
            slots: Arc::clone(&self.slots),
            _done: tx,
        })
    }

    /// Record the abort handle of the task holding `id`'s claim.
    pub fn attach(&self, id: &str, abort: AbortHandle) {
        if let Some(slot) = lock(&self.slots).get_mut(id) {
            slot.abort = Some(abort);
        }
    }

    /// Forget the abort handle for `id` while keeping the claim. Work
    /// after this point can no longer be cancelled.
    pub fn detach(&self, id: &str) {
        if let Some(slot) = lock(&self.slots).get_mut(id) {
            slot.abort = None;
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.slots).contains_key(id)
    }

    pub fn running(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Wait until the claim on `id` is released.
    pub async fn wait(&self, id: &str) {
        let rx = lock(&self.slots).get(id).map(|slot| slot.done.clone());
        if let Some(mut rx) = rx {
            while rx.changed().await.is_ok() {}
        }
    }

    /// Abort the task holding `id`. Returns whether one was found.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.slots)
            .get(id)
            .and_then(|slot| slot.abort.as_ref())
            .filter(|abort| !abort.is_finished())
        {
            Some(abort) => {
                abort.abort();
                true
            }
            None => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Embedding model name; the registry default when `None`.
    pub model: Option<String>,
    /// Storage mode override; the deployment default when `None`.
    pub storage_mode: Option<StorageMode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub document_id: String,
    pub status: DocumentStatus,
    pub storage: SaveOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub document: Document,
    pub running: bool,
    pub vectors: usize,
}

/// Result of [`IngestionPipeline::update`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UpdateReport {
    /// New vectors replaced the old ones.
    Swapped { chunks: usize, storage: SaveOutcome },
    /// The document was not processed; it was re-queued with the new file.
    Requeued { storage: SaveOutcome },
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub document_id: String,
    pub vectors_removed: u64,
    pub file_removed: bool,
}

pub struct IngestionPipeline {
    docs: DocumentRepo,
    store: Arc<dyn VectorStore>,
    storage: Arc<StorageRouter>,
    embedder: Arc<EmbeddingClient>,
    chunker: Chunker,
    metric: Metric,
    timeouts: TimeoutsConfig,
    store_retry: RetryPolicy,
    cache: AnswerCache,
    tracker: IngestTracker,
}

/// Everything staged for one document before vectors are written.
struct Staged {
    records: Vec<VectorRecord>,
    dims: usize,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        docs: DocumentRepo,
        store: Arc<dyn VectorStore>,
        storage: Arc<StorageRouter>,
        embedder: Arc<EmbeddingClient>,
        chunker: Chunker,
        metric: Metric,
        timeouts: TimeoutsConfig,
        store_retry: RetryPolicy,
        cache: AnswerCache,
    ) -> Self {
        Self {
            docs,
            store,
            storage,
            embedder,
            chunker,
            metric,
            timeouts,
            store_retry,
            cache,
            tracker: IngestTracker::new(),
        }
    }

    pub fn tracker(&self) -> &IngestTracker {
        &self.tracker
    }

    /// Wait for any in-flight task on `id` to finish.
    pub async fn wait(&self, id: &str) {
        self.tracker.wait(id).await
    }

    /// Persist the bytes, record a `pending` document and start ingesting.
    pub async fn upload(self: &Arc<Self>, req: UploadRequest) -> Result<UploadReceipt> {
        if req.owner_id.trim().is_empty() {
            return Err(RagError::InvalidRequest("owner id must not be empty".to_string()));
        }
        let storage_key = new_storage_key(&req.filename)?;
        let backend = self.embedder.resolve(req.model.as_deref())?;
        let mode = req.storage_mode.unwrap_or(self.storage.default_mode());
        let store = self.storage.backend(mode)?;

        let outcome = with_timeout(
            self.timeouts.storage(),
            "storage save",
            store.save(&storage_key, &req.bytes),
        )
        .await?;

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let doc = Document {
            vector_collection_name: collection_name_for(&id),
            id: id.clone(),
            owner_id: req.owner_id,
            original_filename: base_name(&req.filename).to_string(),
            storage_key: storage_key.clone(),
            storage_mode: mode,
            storage_state: if outcome.is_degraded() {
                StorageState::LocalOnly
            } else {
                StorageState::Redundant
            },
            embedding_model: backend.model_name().to_string(),
            status: DocumentStatus::Pending,
            error_message: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.docs.insert(&doc).await {
            if let Err(cleanup) = store.delete(&storage_key).await {
                warn!(key = %storage_key, error = %cleanup, "failed to remove orphaned upload");
            }
            return Err(e);
        }

        info!(
            document.id = %id,
            filename = %doc.original_filename,
            storage = %mode,
            degraded = outcome.is_degraded(),
            "document uploaded"
        );

        self.spawn_ingest(&id)?;

        Ok(UploadReceipt {
            document_id: id,
            status: DocumentStatus::Pending,
            storage: outcome,
        })
    }

    pub async fn status(&self, id: &str) -> Result<StatusReport> {
        let document = self.docs.require(id).await?;
        let vectors = self
            .store
            .count(&document.vector_collection_name, &document.id)
            .await?;
        Ok(StatusReport {
            running: self.tracker.is_running(id),
            vectors,
            document,
        })
    }

    /// `failed → pending`, then ingest again.
    pub async fn retry(self: &Arc<Self>, id: &str) -> Result<()> {
        let doc = self.docs.require(id).await?;
        if doc.status != DocumentStatus::Failed {
            return Err(RagError::InvalidState {
                id: id.to_string(),
                status: doc.status.to_string(),
                message: "only failed documents can be retried".to_string(),
            });
        }
        if self.tracker.is_running(id) {
            return Err(RagError::IngestionInProgress(id.to_string()));
        }
        if !self
            .docs
            .transition(id, &[DocumentStatus::Failed], DocumentStatus::Pending, None)
            .await?
        {
            return Err(RagError::IngestionInProgress(id.to_string()));
        }
        info!(document.id = %id, "retrying ingestion");
        self.spawn_ingest(id)
    }

    /// Replace a document's file.
    ///
    /// A `processed` document is re-ingested in place: the call returns
    /// once the new vectors have replaced the old ones, or with the staging
    /// error and nothing changed. Other documents get the new file and are
    /// queued for normal ingestion.
    pub async fn update(
        self: &Arc<Self>,
        id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UpdateReport> {
        let doc = self.docs.require(id).await?;
        let new_key = new_storage_key(filename)?;
        let guard = self.tracker.try_claim(id)?;

        match doc.status {
            DocumentStatus::Processed => {
                let store = self.storage.backend(doc.storage_mode)?;
                let file = StagedFile::new(store, new_key);
                let filename = base_name(filename).to_string();

                // Staging is cancellable. Aborting it drops the claim and
                // the staged file with it.
                let pipeline = Arc::clone(self);
                let staging = tokio::spawn(async move {
                    let staged = pipeline.stage_update(&doc, &filename, bytes, &file).await;
                    (guard, doc, filename, file, staged)
                });
                self.tracker.attach(id, staging.abort_handle());
                let (guard, doc, filename, file, staged) =
                    staging.await.map_err(|e| update_aborted(id, e))?;
                let (outcome, staged) = match staged {
                    Ok(staged) => staged,
                    Err(e) => {
                        file.discard().await;
                        return Err(e);
                    }
                };

                // The commit owns the claim until the swap is done and
                // cannot be cancelled.
                self.tracker.detach(id);
                let pipeline = Arc::clone(self);
                let commit = tokio::spawn(async move {
                    let _guard = guard;
                    pipeline
                        .commit_update(&doc, &filename, file, outcome, staged)
                        .await
                });
                commit.await.map_err(|e| update_aborted(id, e))?
            }
            DocumentStatus::Failed | DocumentStatus::Pending => {
                let outcome = self
                    .replace_file(&doc, base_name(filename), &new_key, &bytes)
                    .await?;
                if doc.status == DocumentStatus::Failed {
                    self.docs
                        .transition(id, &[DocumentStatus::Failed], DocumentStatus::Pending, None)
                        .await?;
                }
                drop(guard);
                self.spawn_ingest(id)?;
                Ok(UpdateReport::Requeued { storage: outcome })
            }
            DocumentStatus::Processing => Err(RagError::InvalidState {
                id: id.to_string(),
                status: doc.status.to_string(),
                message: "document is marked processing by an interrupted run; cancel it first"
                    .to_string(),
            }),
        }
    }

    /// Drop the document's vectors, soft-delete it, then remove its stored
    /// file. A vector store failure leaves the document in place; only the
    /// file removal is best effort.
    pub async fn delete(&self, id: &str) -> Result<DeleteReport> {
        let doc = self.docs.require(id).await?;
        let _guard = self.tracker.try_claim(id)?;

        let limit = self.timeouts.vector_store();
        let vectors_removed = self
            .store_retry
            .run("delete vectors", |_| {
                with_timeout(
                    limit,
                    "vector store",
                    self.store.delete_by_document(&doc.vector_collection_name, id),
                )
            })
            .await
            .inspect_err(|e| {
                error!(document.id = %id, error = %e, "failed to delete vectors; document kept")
            })?;

        self.docs.soft_delete(id).await?;

        let file_removed = match self.storage.backend(doc.storage_mode) {
            Ok(store) => match with_timeout(
                self.timeouts.storage(),
                "storage delete",
                store.delete(&doc.storage_key),
            )
            .await
            {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(document.id = %id, key = %doc.storage_key, error = %e, "failed to delete stored file");
                    false
                }
            },
            Err(e) => {
                warn!(document.id = %id, error = %e, "storage backend unavailable for delete");
                false
            }
        };

        info!(document.id = %id, vectors_removed, file_removed, "document deleted");
        Ok(DeleteReport {
            document_id: id.to_string(),
            vectors_removed,
            file_removed,
        })
    }

    /// Abort an in-flight ingestion. A `pending` or `processing` document
    /// ends up `failed` with message "cancelled".
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        self.docs.require(id).await?;
        let aborted = self.tracker.cancel(id);
        if aborted {
            self.tracker.wait(id).await;
        }
        let marked = self
            .docs
            .transition(
                id,
                &[DocumentStatus::Pending, DocumentStatus::Processing],
                DocumentStatus::Failed,
                Some("cancelled"),
            )
            .await?;
        if aborted || marked {
            info!(document.id = %id, "ingestion cancelled");
        }
        Ok(aborted || marked)
    }

    /// Restart bookkeeping: `pending` documents are queued again,
    /// `processing` ones (their task died with the previous process) are
    /// marked failed so they can be retried.
    pub async fn resume_unfinished(self: &Arc<Self>) -> Result<usize> {
        let mut queued = 0;
        for doc in self.docs.unfinished().await? {
            match doc.status {
                DocumentStatus::Pending => {
                    if self.spawn_ingest(&doc.id).is_ok() {
                        queued += 1;
                    }
                }
                DocumentStatus::Processing => {
                    self.docs
                        .transition(
                            &doc.id,
                            &[DocumentStatus::Processing],
                            DocumentStatus::Failed,
                            Some("interrupted by restart"),
                        )
                        .await?;
                    warn!(document.id = %doc.id, "marked interrupted ingestion as failed");
                }
                _ => {}
            }
        }
        Ok(queued)
    }

    fn spawn_ingest(self: &Arc<Self>, id: &str) -> Result<()> {
        let guard = self.tracker.try_claim(id)?;
        let pipeline = Arc::clone(self);
        let task_id = id.to_string();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = pipeline.run_ingest(&task_id).await {
                error!(document.id = %task_id, error = %e, "ingestion bookkeeping failed");
            }
        });
        self.tracker.attach(id, handle.abort_handle());
        Ok(())
    }

    async fn run_ingest(&self, id: &str) -> Result<()> {
        if !self
            .docs
            .transition(id, &[DocumentStatus::Pending], DocumentStatus::Processing, None)
            .await?
        {
            debug!(document.id = %id, "document no longer pending; skipping");
            return Ok(());
        }
        let doc = self.docs.require(id).await?;

        match self.process(&doc).await {
            Ok(chunks) => {
                self.docs
                    .transition(id, &[DocumentStatus::Processing], DocumentStatus::Processed, None)
                    .await?;
                info!(document.id = %id, chunks, model = %doc.embedding_model, "document processed");
            }
            Err(e) => {
                error!(document.id = %id, error = %e, "ingestion failed");
                // Vectors are written in one transaction at the end, but a
                // retry after a crash may find leftovers from an older run.
                if let Err(cleanup) = self
                    .store
                    .delete_by_document(&doc.vector_collection_name, id)
                    .await
                {
                    warn!(document.id = %id, error = %cleanup, "failed to clear partial vectors");
                }
                self.docs
                    .transition(
                        id,
                        &[DocumentStatus::Processing],
                        DocumentStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn process(&self, doc: &Document) -> Result<usize> {
        let store = self.storage.backend(doc.storage_mode)?;
        let bytes = with_timeout(
            self.timeouts.storage(),
            "storage load",
            store.load(&doc.storage_key),
        )
        .await?;

        let staged = self
            .stage(doc, &doc.original_filename, bytes)
            .await?;
        self.write_vectors(doc, &staged).await?;
        Ok(staged.records.len())
    }

    /// Extract, chunk and embed `bytes` for `doc` without writing anything.
    async fn stage(&self, doc: &Document, filename: &str, bytes: Vec<u8>) -> Result<Staged> {
        let backend = self.embedder.resolve(Some(&doc.embedding_model))?;

        let name = filename.to_string();
        let text = with_timeout(self.timeouts.extraction(), "text extraction", async move {
            let task_name = name.clone();
            tokio::task::spawn_blocking(move || extract_text(&bytes, &task_name))
                .await
                .map_err(|e| RagError::ExtractionError {
                    filename: name,
                    message: format!("extractor crashed: {}", e),
                })?
        })
        .await?;

        let spans: Vec<(String, usize)> = self
            .chunker
            .chunks(&text)
            .map(|span| (span.text.to_string(), span.start))
            .collect();
        let texts: Vec<String> = spans.iter().map(|(t, _)| t.clone()).collect();
        debug!(document.id = %doc.id, chunks = texts.len(), "chunked document");

        let vectors = self.embedder.embed_with(backend.as_ref(), &texts).await?;

        let records = spans
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, ((text, start), vector))| VectorRecord {
                document_id: doc.id.clone(),
                chunk_index: index as i64,
                filename: filename.to_string(),
                start_offset: start as i64,
                text,
                vector,
            })
            .collect();

        Ok(Staged {
            records,
            dims: backend.dims(),
        })
    }

    async fn write_vectors(&self, doc: &Document, staged: &Staged) -> Result<()> {
        let spec = CollectionSpec::new(&doc.vector_collection_name, staged.dims, self.metric);
        let limit = self.timeouts.vector_store();

        self.store_retry
            .run("ensure collection", |_| {
                with_timeout(limit, "vector store", self.store.ensure_collection(&spec))
            })
            .await?;
        self.store_retry
            .run("replace vectors", |_| {
                with_timeout(
                    limit,
                    "vector store",
                    self.store
                        .replace_document(&spec.name, &doc.id, &staged.records),
                )
            })
            .await
    }

    async fn replace_file(
        &self,
        doc: &Document,
        filename: &str,
        new_key: &str,
        bytes: &[u8],
    ) -> Result<SaveOutcome> {
        let store = self.storage.backend(doc.storage_mode)?;
        let outcome =
            with_timeout(self.timeouts.storage(), "storage save", store.save(new_key, bytes))
                .await?;

        let swap = FileSwap {
            storage_key: new_key.to_string(),
            original_filename: filename.to_string(),
            storage_mode: doc.storage_mode,
            storage_state: if outcome.is_degraded() {
                StorageState::LocalOnly
            } else {
                StorageState::Redundant
            },
        };
        if let Err(e) = self.docs.swap_file(&doc.id, &swap).await {
            remove_file(store.as_ref(), new_key).await;
            return Err(e);
        }

        if let Err(e) = store.delete(&doc.storage_key).await {
            warn!(document.id = %doc.id, key = %doc.storage_key, error = %e, "failed to delete replaced file");
        }
        Ok(outcome)
    }

    /// Save the new file and stage its vectors. On failure the staged file
    /// is removed and nothing else has changed.
    async fn stage_update(
        &self,
        doc: &Document,
        filename: &str,
        bytes: Vec<u8>,
        file: &StagedFile,
    ) -> Result<(SaveOutcome, Staged)> {
        let outcome = with_timeout(
            self.timeouts.storage(),
            "storage save",
            file.store.save(&file.key, &bytes),
        )
        .await?;

        match self.stage(doc, filename, bytes).await {
            Ok(staged) => Ok((outcome, staged)),
            Err(e) => {
                warn!(document.id = %doc.id, error = %e, "re-ingestion failed; keeping current version");
                Err(e)
            }
        }
    }

    async fn commit_update(
        &self,
        doc: &Document,
        filename: &str,
        file: StagedFile,
        outcome: SaveOutcome,
        staged: Staged,
    ) -> Result<UpdateReport> {
        if let Err(e) = self.write_vectors(doc, &staged).await {
            warn!(document.id = %doc.id, error = %e, "vector swap failed; keeping current version");
            file.discard().await;
            return Err(e);
        }

        let swap = FileSwap {
            storage_key: file.key.clone(),
            original_filename: filename.to_string(),
            storage_mode: doc.storage_mode,
            storage_state: if outcome.is_degraded() {
                StorageState::LocalOnly
            } else {
                StorageState::Redundant
            },
        };
        if let Err(e) = self.docs.swap_file(&doc.id, &swap).await {
            file.discard().await;
            return Err(e);
        }
        let store = file.keep();
        // Same id, new content: the access fingerprint cannot tell.
        self.cache.clear();

        if let Err(e) = store.delete(&doc.storage_key).await {
            warn!(document.id = %doc.id, key = %doc.storage_key, error = %e, "failed to delete replaced file");
        }

        info!(document.id = %doc.id, chunks = staged.records.len(), "document re-ingested");
        Ok(UpdateReport::Swapped {
            chunks: staged.records.len(),
            storage: outcome,
        })
    }
}

/// A file written for an update that is not committed yet. Removed on
/// drop unless [`StagedFile::keep`] was called.
struct StagedFile {
    store: Arc<dyn StorageBackend>,
    key: String,
    armed: bool,
}

impl StagedFile {
    fn new(store: Arc<dyn StorageBackend>, key: String) -> Self {
        Self {
            store,
            key,
            armed: true,
        }
    }

    fn keep(mut self) -> Arc<dyn StorageBackend> {
        self.armed = false;
        Arc::clone(&self.store)
    }

    async fn discard(mut self) {
        self.armed = false;
        remove_file(self.store.as_ref(), &self.key).await;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { remove_file(store.as_ref(), &key).await });
            }
            Err(_) => warn!(key = %key, "no runtime to remove staged file"),
        }
    }
}

async fn remove_file(store: &dyn StorageBackend, key: &str) {
    if let Err(e) = store.delete(key).await {
        warn!(key, error = %e, "failed to remove staged file");
    }
}

fn update_aborted(id: &str, e: tokio::task::JoinError) -> RagError {
    RagError::InvalidState {
        id: id.to_string(),
        status: DocumentStatus::Processed.to_string(),
        message: if e.is_cancelled() {
            "update cancelled".to_string()
        } else {
            format!("update task failed: {}", e)
        },
    }
}

/// Final path component of an uploaded filename.
fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}
