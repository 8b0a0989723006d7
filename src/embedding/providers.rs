//! Concrete embedding backends.
//!
//! - **[`OpenAiEmbedder`]**: `POST {base}/embeddings` on any OpenAI-compatible endpoint.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on an Ollama instance.
//! - **`LocalEmbedder`**: in-process inference via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//!
//! Each backend performs exactly one request per [`EmbeddingBackend::embed`]
//! call. HTTP 429, 5xx and network errors are reported as transient, other
//! 4xx responses as permanent; the [`EmbeddingClient`](super::EmbeddingClient)
//! decides whether to retry.

use async_trait::async_trait;
use docqa_core::embedding::EmbeddingBackend;
use docqa_core::models::LlmModelConfig;
use docqa_core::{RagError, Result};
use std::sync::Arc;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

fn http_client(provider: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::InvalidConfig(format!("{} http client: {}", provider, e)))
}

/// Map a non-success HTTP status to an embedding error.
fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> RagError {
    let message = format!("API error {}: {}", status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        RagError::embedding_transient(provider, message)
    } else {
        RagError::embedding(provider, message)
    }
}

fn request_error(provider: &str, e: reqwest::Error) -> RagError {
    RagError::embedding_transient(provider, format!("request failed: {}", e))
}

// ============ OpenAI-compatible ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
}

impl OpenAiEmbedder {
    /// The API key comes from the model entry, then `OPENAI_API_KEY`.
    pub fn new(model: &LlmModelConfig, timeout: Duration) -> Result<Self> {
        let dims = require_dims(model)?;
        let api_key = model
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                RagError::InvalidConfig(format!(
                    "model '{}' has no api_key and OPENAI_API_KEY is not set",
                    model.name
                ))
            })?;
        let base_url = model
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: http_client("openai", timeout)?,
            model: model.name.clone(),
            dims,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("openai", status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| request_error("openai", e))?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::embedding("openai", "invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::embedding("openai", "invalid response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(model: &LlmModelConfig, timeout: Duration) -> Result<Self> {
        let dims = require_dims(model)?;
        Ok(Self {
            client: http_client("ollama", timeout)?,
            model: model.name.clone(),
            dims,
            url: ollama_root(model.base_url.as_deref()),
        })
    }
}

/// Ollama's native API lives at the server root; OpenAI-style `/v1`
/// suffixes are stripped.
pub(crate) fn ollama_root(base_url: Option<&str>) -> String {
    let url = base_url.unwrap_or(OLLAMA_URL).trim_end_matches('/');
    url.strip_suffix("/v1").unwrap_or(url).to_string()
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::embedding_transient(
                    "ollama",
                    format!("connection error (is Ollama running at {}?): {}", self.url, e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("ollama", status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| request_error("ollama", e))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::embedding("ollama", "invalid response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| {
                    RagError::embedding("ollama", "invalid response: embedding is not an array")
                })
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn require_dims(model: &LlmModelConfig) -> Result<usize> {
    match model.dims {
        Some(d) if d > 0 => Ok(d),
        _ => Err(RagError::InvalidConfig(format!(
            "embedding model '{}' must declare dims > 0",
            model.name
        ))),
    }
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    kind: fastembed::EmbeddingModel,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(model: &LlmModelConfig) -> Result<Self> {
        let kind = fastembed_model(&model.name)?;
        let dims = model.dims.unwrap_or(match model.name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name: model.name.clone(),
            dims,
            kind,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(RagError::InvalidConfig(format!(
            "unknown local embedding model '{}'",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingBackend for LocalEmbedder {
    fn provider(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let kind = self.kind.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| RagError::embedding("local", format!("model init failed: {}", e)))?;
                *guard = Some(model);
            }
            match guard.as_mut() {
                Some(model) => model
                    .embed(texts, None)
                    .map_err(|e| RagError::embedding("local", e.to_string())),
                None => Err(RagError::embedding("local", "model not initialized")),
            }
        })
        .await
        .map_err(|e| RagError::embedding("local", format!("embedding task failed: {}", e)))?
    }
}

/// Instantiate the backend for an `embedding` model entry.
pub fn create_backend(
    model: &LlmModelConfig,
    timeout: Duration,
) -> Result<Arc<dyn EmbeddingBackend>> {
    match model.resolved_provider().as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(model, timeout)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(model, timeout)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(model)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RagError::InvalidConfig(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(RagError::InvalidConfig(format!(
            "unknown embedding provider '{}' for model '{}'",
            other, model.name
        ))),
    }
}
