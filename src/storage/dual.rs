//! Dual storage: every write goes to local disk and the object store.
//!
//! | local | object | result |
//! |-------|--------|--------|
//! | ok    | ok     | `Stored` |
//! | ok    | err    | `Degraded`, key recorded as local-only |
//! | err   | ok     | `Err(StorageError)`, object copy removed |
//! | err   | err    | `Err(StorageError)` |
//!
//! Reads prefer the object store and fall back to local disk. Deletes hit
//! both and fail only if both fail.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docqa_core::storage::{SaveOutcome, StorageBackend};
use docqa_core::{RagError, Result};
use tracing::warn;

const BACKEND: &str = "dual";

pub struct DualStorage {
    local: Arc<dyn StorageBackend>,
    object: Arc<dyn StorageBackend>,
    local_only: Mutex<BTreeSet<String>>,
}

impl DualStorage {
    pub fn new(local: Arc<dyn StorageBackend>, object: Arc<dyn StorageBackend>) -> Self {
        Self {
            local,
            object,
            local_only: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn local(&self) -> &Arc<dyn StorageBackend> {
        &self.local
    }

    pub fn object(&self) -> &Arc<dyn StorageBackend> {
        &self.object
    }

    /// Keys written only to local disk since this process started.
    /// The durable record is the document's `storage_state`.
    pub fn pending_reconciliation(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Copy `key` from local disk to the object store.
    pub async fn replicate(&self, key: &str) -> Result<()> {
        let bytes = self.local.load(key).await?;
        self.object.save(key, &bytes).await?;
        self.lock().remove(key);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.local_only
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StorageBackend for DualStorage {
    fn kind(&self) -> &str {
        BACKEND
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<SaveOutcome> {
        let (local, object) = tokio::join!(self.local.save(key, bytes), self.object.save(key, bytes));

        match (local, object) {
            (Ok(_), Ok(_)) => Ok(SaveOutcome::Stored),
            (Ok(_), Err(e)) => {
                warn!(key, error = %e, "object store write failed; keeping local copy only");
                self.lock().insert(key.to_string());
                Ok(SaveOutcome::Degraded {
                    reason: format!("object store unavailable: {}", e),
                })
            }
            (Err(e), Ok(_)) => {
                if let Err(cleanup) = self.object.delete(key).await {
                    warn!(key, error = %cleanup, "failed to remove object copy after local write failure");
                }
                Err(RagError::storage(
                    BACKEND,
                    format!("local write failed: {}", e),
                ))
            }
            (Err(local_err), Err(object_err)) => Err(RagError::storage(
                BACKEND,
                format!(
                    "both backends failed: local: {}; object: {}",
                    local_err, object_err
                ),
            )),
        }
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        match self.object.load(key).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!(key, error = %e, "object store read failed; falling back to local");
                self.local.load(key).await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let (local, object) = tokio::join!(self.local.delete(key), self.object.delete(key));
        self.lock().remove(key);

        match (local, object) {
            (Ok(a), Ok(b)) => Ok(a || b),
            (Ok(a), Err(e)) | (Err(e), Ok(a)) => {
                warn!(key, error = %e, "delete failed on one backend");
                Ok(a)
            }
            (Err(local_err), Err(object_err)) => Err(RagError::storage(
                BACKEND,
                format!(
                    "delete failed on both backends: local: {}; object: {}",
                    local_err, object_err
                ),
            )),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Ok(true) = self.object.exists(key).await {
            return Ok(true);
        }
        self.local.exists(key).await
    }

    async fn available(&self) -> bool {
        self.local.available().await && self.object.available().await
    }
}
