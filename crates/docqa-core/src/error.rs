//! Error taxonomy shared by every pipeline component.

use thiserror::Error;

use crate::models::ModelType;

/// Errors produced by the ingestion pipeline, the answer engine and
/// their backends.
///
/// Backend variants carry a `transient` flag: transient failures
/// (timeouts, rate limits, 5xx, dropped connections) are eligible for
/// the bounded retry policy, everything else propagates immediately.
#[derive(Debug, Error)]
pub enum RagError {
    /// Bad chunking parameters, missing backend settings and similar.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A model reference did not resolve to an active model of the
    /// requested type.
    #[error("{kind} model not found: {name}")]
    ModelNotFound { kind: ModelType, name: String },

    /// Malformed caller input (empty question, unsupported file type).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The stored bytes could not be turned into text.
    #[error("extraction failed for '{filename}': {message}")]
    ExtractionError { filename: String, message: String },

    #[error("embedding backend error ({provider}): {message}")]
    EmbeddingBackendError {
        provider: String,
        message: String,
        transient: bool,
    },

    #[error("chat backend error ({provider}): {message}")]
    ChatBackendError {
        provider: String,
        message: String,
        transient: bool,
    },

    /// A vector's length disagrees with the dimension declared by the
    /// model or collection. Never retried.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store error ({backend}): {message}")]
    VectorStoreError {
        backend: String,
        message: String,
        transient: bool,
    },

    #[error("storage error ({backend}): {message}")]
    StorageError { backend: String, message: String },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Another ingestion for the same document is still running.
    #[error("ingestion already in progress for document {0}")]
    IngestionInProgress(String),

    /// The document's status does not allow the requested transition.
    #[error("document {id} is {status}: {message}")]
    InvalidState {
        id: String,
        status: String,
        message: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("{what} timed out after {millis}ms")]
    Timeout { what: String, millis: u64 },
}

impl RagError {
    /// Whether the failure may succeed if the same call is repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::EmbeddingBackendError { transient, .. }
            | RagError::ChatBackendError { transient, .. }
            | RagError::VectorStoreError { transient, .. } => *transient,
            RagError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::EmbeddingBackendError {
            provider: provider.into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn embedding_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::EmbeddingBackendError {
            provider: provider.into(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn chat(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::ChatBackendError {
            provider: provider.into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn chat_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::ChatBackendError {
            provider: provider.into(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn storage(backend: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::StorageError {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// A schema conflict or other non-retryable vector store failure.
    pub fn vector_store(backend: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::VectorStoreError {
            backend: backend.into(),
            message: message.into(),
            transient: false,
        }
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RagError::embedding_transient("openai", "503").is_transient());
        assert!(!RagError::embedding("openai", "401").is_transient());
        assert!(!RagError::DimensionMismatch {
            expected: 3,
            actual: 4
        }
        .is_transient());
        assert!(RagError::Timeout {
            what: "chat".into(),
            millis: 30_000
        }
        .is_transient());
        assert!(!RagError::vector_store("sqlite", "dims conflict").is_transient());
    }

    #[test]
    fn test_model_not_found_message() {
        let err = RagError::ModelNotFound {
            kind: ModelType::Embedding,
            name: "missing".into(),
        };
        assert_eq!(err.to_string(), "embedding model not found: missing");
    }
}
