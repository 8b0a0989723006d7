//! Document byte storage capability.
//!
//! Local, object-store and dual backends implement [`StorageBackend`] in
//! the app crate. Keys are always generated here from a fresh UUID plus
//! the original extension, never from the raw filename.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{RagError, Result};

/// File extensions the ingestion pipeline can extract text from.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".pdf", ".docx", ".doc", ".txt", ".md"];

/// Key prefix for uploaded documents.
pub const KEY_PREFIX: &str = "documents/";

/// Result of a successful save.
///
/// `Degraded` means the bytes are persisted but with less redundancy than
/// the mode requires; `reason` says which copy is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    Stored,
    Degraded { reason: String },
}

impl SaveOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SaveOutcome::Degraded { .. })
    }
}

/// Persistent storage for original document bytes.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// `local`, `object` or `dual`.
    fn kind(&self) -> &str;

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<SaveOutcome>;

    async fn load(&self, key: &str) -> Result<Vec<u8>>;

    /// Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Cheap reachability check for introspection.
    async fn available(&self) -> bool;
}

/// Lower-cased extension of `filename` including the leading dot.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(name[dot..].to_ascii_lowercase())
}

/// Whether the pipeline can ingest `filename`.
pub fn is_supported(filename: &str) -> bool {
    file_extension(filename)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Generate a collision-resistant storage key `documents/<uuid><ext>`.
pub fn new_storage_key(filename: &str) -> Result<String> {
    let ext = file_extension(filename)
        .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| {
            RagError::InvalidRequest(format!(
                "unsupported file type '{}'; supported: {}",
                filename,
                SUPPORTED_EXTENSIONS.join(", ")
            ))
        })?;
    Ok(format!("{}{}{}", KEY_PREFIX, Uuid::new_v4(), ext))
}

/// Reject keys that could escape a storage root.
pub fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains(':')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(RagError::storage("key", format!("invalid storage key '{}'", key)));
    }
    Ok(())
}

/// MIME type recorded on object-store uploads.
pub fn content_type_for(key: &str) -> &'static str {
    match file_extension(key).as_deref() {
        Some(".pdf") => "application/pdf",
        Some(".txt") => "text/plain",
        Some(".md") => "text/markdown",
        Some(".docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some(".doc") => "application/msword",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("Report.PDF").as_deref(), Some(".pdf"));
        assert_eq!(file_extension("a/b/notes.md").as_deref(), Some(".md"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(file_extension(".bashrc"), None);
        assert_eq!(file_extension("README"), None);
    }

    #[test]
    fn test_new_storage_key_ignores_filename() {
        let key = new_storage_key("../../etc/passwd.txt").unwrap();
        assert!(key.starts_with(KEY_PREFIX));
        assert!(key.ends_with(".txt"));
        assert!(!key.contains(".."));
        assert!(validate_key(&key).is_ok());
        assert_ne!(key, new_storage_key("passwd.txt").unwrap());
    }

    #[test]
    fn test_new_storage_key_rejects_unsupported() {
        assert!(matches!(
            new_storage_key("image.png"),
            Err(RagError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("documents/abc.pdf").is_ok());
        assert!(validate_key("../x").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("documents//x").is_err());
        assert!(validate_key("documents\\x").is_err());
        assert!(validate_key("C:/x").is_err());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("documents/x.doc"), "application/msword");
        assert_eq!(content_type_for("documents/x.md"), "text/markdown");
        assert_eq!(content_type_for("documents/x.bin"), "application/octet-stream");
    }

    #[test]
    fn test_save_outcome_serializes_tagged() {
        let json = serde_json::to_string(&SaveOutcome::Degraded {
            reason: "object store down".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"degraded","reason":"object store down"}"#);
    }
}
