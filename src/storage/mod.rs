//! Storage backends for original document bytes and the per-mode router.
//!
//! - **[`LocalStorage`]**: files under `[storage.local] root`.
//! - **[`ObjectStorage`]**: S3-compatible bucket, SigV4-signed.
//! - **[`DualStorage`]**: both, with degraded-mode semantics.
//!
//! The deployment picks a default [`StorageMode`]; uploads may override it,
//! and the mode used is recorded on the document so later reads and
//! deletes go to the same place.

pub mod dual;
pub mod local;
pub mod object;

use std::sync::Arc;

use docqa_core::models::StorageMode;
use docqa_core::storage::{StorageBackend, SUPPORTED_EXTENSIONS};
use docqa_core::{RagError, Result};
use serde::Serialize;

use crate::config::Config;

pub use dual::DualStorage;
pub use local::LocalStorage;
pub use object::ObjectStorage;

/// Configured mode plus per-backend reachability.
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub mode: StorageMode,
    pub local_available: bool,
    /// `None` when no object store is configured.
    pub object_available: Option<bool>,
    pub supported_types: Vec<&'static str>,
}

pub struct StorageRouter {
    default_mode: StorageMode,
    local: Arc<dyn StorageBackend>,
    object: Option<Arc<dyn StorageBackend>>,
    dual: Option<Arc<DualStorage>>,
}

impl StorageRouter {
    pub fn from_config(config: &Config) -> Result<Self> {
        let local: Arc<dyn StorageBackend> =
            Arc::new(LocalStorage::new(config.storage.local.root.clone()));
        let object: Option<Arc<dyn StorageBackend>> = match config.storage.object {
            Some(ref object) => Some(Arc::new(ObjectStorage::new(
                object,
                config.timeouts.storage(),
            )?)),
            None => None,
        };
        Ok(Self::new(config.storage.mode, local, object))
    }

    pub fn new(
        default_mode: StorageMode,
        local: Arc<dyn StorageBackend>,
        object: Option<Arc<dyn StorageBackend>>,
    ) -> Self {
        let dual = object
            .as_ref()
            .map(|object| Arc::new(DualStorage::new(local.clone(), object.clone())));
        Self {
            default_mode,
            local,
            object,
            dual,
        }
    }

    pub fn default_mode(&self) -> StorageMode {
        self.default_mode
    }

    /// Backend for `mode`; object and dual modes need `[storage.object]`.
    pub fn backend(&self, mode: StorageMode) -> Result<Arc<dyn StorageBackend>> {
        match mode {
            StorageMode::Local => Ok(self.local.clone()),
            StorageMode::Object => self
                .object
                .clone()
                .ok_or_else(|| not_configured(mode)),
            StorageMode::Dual => self
                .dual
                .clone()
                .map(|d| d as Arc<dyn StorageBackend>)
                .ok_or_else(|| not_configured(mode)),
        }
    }

    pub fn dual(&self) -> Option<&Arc<DualStorage>> {
        self.dual.as_ref()
    }

    /// Copy a local-only dual-mode object to the object store.
    pub async fn replicate(&self, key: &str) -> Result<()> {
        match self.dual {
            Some(ref dual) => dual.replicate(key).await,
            None => Err(not_configured(StorageMode::Dual)),
        }
    }

    pub async fn info(&self) -> StorageInfo {
        let local_available = self.local.available().await;
        let object_available = match self.object {
            Some(ref object) => Some(object.available().await),
            None => None,
        };
        StorageInfo {
            mode: self.default_mode,
            local_available,
            object_available,
            supported_types: SUPPORTED_EXTENSIONS.to_vec(),
        }
    }
}

fn not_configured(mode: StorageMode) -> RagError {
    RagError::InvalidConfig(format!(
        "storage mode '{}' requires a [storage.object] section",
        mode
    ))
}
