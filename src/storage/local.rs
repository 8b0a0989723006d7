//! Filesystem storage rooted at `[storage.local] root`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docqa_core::storage::{validate_key, SaveOutcome, StorageBackend};
use docqa_core::{RagError, Result};

const BACKEND: &str = "local";

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// The root directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_err(action: &str, key: &str, e: std::io::Error) -> RagError {
    RagError::storage(BACKEND, format!("failed to {} '{}': {}", action, key, e))
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn kind(&self) -> &str {
        BACKEND
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<SaveOutcome> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("create directory for", key, e))?;
        }

        // Write-then-rename so readers never see a partial file.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_err("write", key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err("rename", key, e))?;
        Ok(SaveOutcome::Stored)
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_err("read", key, e))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("delete", key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err("stat", key, e))
    }

    async fn available(&self) -> bool {
        tokio::fs::create_dir_all(&self.root).await.is_ok()
    }
}
