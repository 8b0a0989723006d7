//! Core data models shared by the ingestion pipeline and the answer engine.
//!
//! Documents and QA history rows are persisted by the application crate;
//! vector records live inside a [`VectorStore`](crate::store::VectorStore).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing status of an uploaded document.
///
/// ```text
/// pending ──▶ processing ──▶ processed
///    ▲             │
///    └── failed ◀──┘   (failed → pending only on explicit retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Whether `self → next` is an allowed edge of the state machine.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Processing)
                | (DocumentStatus::Processing, DocumentStatus::Processed)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
                | (DocumentStatus::Pending, DocumentStatus::Failed)
                | (DocumentStatus::Failed, DocumentStatus::Pending)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where original document bytes are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Local,
    Object,
    Dual,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Local => "local",
            StorageMode::Object => "object",
            StorageMode::Dual => "dual",
        }
    }

    /// Parses a mode name. `minio` and `both` are accepted as aliases of
    /// `object` and `dual`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Some(StorageMode::Local),
            "object" | "minio" | "s3" => Some(StorageMode::Object),
            "dual" | "both" => Some(StorageMode::Dual),
            _ => None,
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redundancy state of a document's stored bytes.
///
/// `LocalOnly` marks a dual-mode document whose object-store write failed;
/// the reconciliation job re-replicates it and flips it to `Redundant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageState {
    Redundant,
    LocalOnly,
}

impl StorageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageState::Redundant => "redundant",
            StorageState::LocalOnly => "local_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "redundant" => Some(StorageState::Redundant),
            "local_only" => Some(StorageState::LocalOnly),
            _ => None,
        }
    }
}

/// An uploaded document and its pipeline bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub original_filename: String,
    pub storage_key: String,
    pub storage_mode: StorageMode,
    pub storage_state: StorageState,
    pub vector_collection_name: String,
    pub embedding_model: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Derive the per-document vector collection name.
///
/// Deterministic in the document id, so the binding recorded on the
/// document row never changes.
pub fn collection_name_for(document_id: &str) -> String {
    format!("doc_{}", document_id.replace('-', ""))
}

/// Kind of model an [`LlmModelConfig`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Chat,
    Embedding,
    Rerank,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Chat => "chat",
            ModelType::Embedding => "embedding",
            ModelType::Rerank => "rerank",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(ModelType::Chat),
            "embedding" => Some(ModelType::Embedding),
            "rerank" => Some(ModelType::Rerank),
            _ => None,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend settings for one named model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmModelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    /// `openai`, `ollama` or `local`. Inferred from the name and endpoint
    /// when absent.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Declared vector dimension (embedding models only).
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

fn default_true() -> bool {
    true
}

impl LlmModelConfig {
    /// Provider name, falling back to endpoint heuristics: `nomic` models
    /// and the default Ollama port select `ollama`, everything else is
    /// treated as an OpenAI-compatible endpoint.
    pub fn resolved_provider(&self) -> String {
        if let Some(p) = self.provider.as_deref().filter(|p| !p.is_empty()) {
            return p.to_ascii_lowercase();
        }
        let by_name = self.name.to_ascii_lowercase().contains("nomic");
        let by_port = self
            .base_url
            .as_deref()
            .map(|u| u.contains(":11434"))
            .unwrap_or(false);
        if by_name || by_port {
            "ollama".to_string()
        } else {
            "openai".to_string()
        }
    }

    /// Whether the model may be handed out by the registry.
    pub fn is_usable(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

/// One embedded chunk as stored in a vector collection.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub document_id: String,
    pub chunk_index: i64,
    pub filename: String,
    /// Byte offset of the chunk in the extracted text.
    pub start_offset: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A search hit with its provenance. Higher scores are always better.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub document_id: String,
    pub chunk_index: i64,
    pub filename: String,
    pub start_offset: i64,
    pub text: String,
    pub score: f32,
}

/// One answered question.
#[derive(Debug, Clone, Serialize)]
pub struct QaRecord {
    pub id: i64,
    pub owner_id: String,
    pub question: String,
    pub answer: String,
    pub created_at: i64,
}
