//! TOML configuration.
//!
//! Loaded once at startup by [`load_config`], validated, and then shared as
//! an immutable `Arc<Config>` snapshot by every component.
//!
//! ```toml
//! [db]
//! path = "./data/docqa.sqlite"
//!
//! [chunking]
//! size = 1000
//! overlap = 200
//!
//! [retrieval]
//! top_k = 5
//! max_context_chars = 6000
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-ada-002"
//! dims = 1536
//!
//! [chat]
//! provider = "openai"
//! model = "gpt-3.5-turbo"
//!
//! [storage]
//! mode = "dual"
//!
//! [storage.local]
//! root = "./data/uploads"
//!
//! [storage.object]
//! bucket = "documents"
//! endpoint_url = "http://localhost:9000"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use docqa_core::models::{LlmModelConfig, StorageMode};
use docqa_core::store::Metric;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Extra models seeded into the model registry.
    #[serde(default)]
    pub models: Vec<LlmModelConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_metric")]
    pub metric: Metric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
            metric: default_metric(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    6000
}
fn default_metric() -> Metric {
    Metric::Cosine
}

/// The default embedding model and the client's batching/retry settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key: None,
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// The default chat model.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_mode", deserialize_with = "de_storage_mode")]
    pub mode: StorageMode,
    #[serde(default)]
    pub local: LocalStorageConfig,
    #[serde(default)]
    pub object: Option<ObjectStorageConfig>,
    /// Seconds between background reconciliation runs in `serve`; 0 disables.
    #[serde(default)]
    pub reconcile_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: default_storage_mode(),
            local: LocalStorageConfig::default(),
            object: None,
            reconcile_interval_secs: 0,
        }
    }
}

fn default_storage_mode() -> StorageMode {
    StorageMode::Local
}

fn de_storage_mode<'de, D>(deserializer: D) -> std::result::Result<StorageMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    StorageMode::parse(&s).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "unknown storage mode '{}', expected local, object or dual",
            s
        ))
    })
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_root")]
    pub root: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: default_local_root(),
        }
    }
}

fn default_local_root() -> PathBuf {
    PathBuf::from("./data/uploads")
}

/// S3-compatible bucket settings (AWS S3, MinIO, LocalStack).
///
/// Credentials fall back to `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
/// and `AWS_SESSION_TOKEN`.
#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Upper bounds for every external call.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_embedding_secs")]
    pub embedding_secs: u64,
    #[serde(default = "default_chat_secs")]
    pub chat_secs: u64,
    #[serde(default = "default_storage_secs")]
    pub storage_secs: u64,
    #[serde(default = "default_extraction_secs")]
    pub extraction_secs: u64,
    #[serde(default = "default_vector_store_secs")]
    pub vector_store_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            embedding_secs: default_embedding_secs(),
            chat_secs: default_chat_secs(),
            storage_secs: default_storage_secs(),
            extraction_secs: default_extraction_secs(),
            vector_store_secs: default_vector_store_secs(),
        }
    }
}

fn default_embedding_secs() -> u64 {
    30
}
fn default_chat_secs() -> u64 {
    60
}
fn default_storage_secs() -> u64 {
    30
}
fn default_extraction_secs() -> u64 {
    120
}
fn default_vector_store_secs() -> u64 {
    30
}

impl TimeoutsConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }
    pub fn chat(&self) -> Duration {
        Duration::from_secs(self.chat_secs)
    }
    pub fn storage(&self) -> Duration {
        Duration::from_secs(self.storage_secs)
    }
    pub fn extraction(&self) -> Duration {
        Duration::from_secs(self.extraction_secs)
    }
    pub fn vector_store(&self) -> Duration {
        Duration::from_secs(self.vector_store_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_cache_max_entries() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.size == 0 {
        bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.size ({})",
            config.chunking.overlap,
            config.chunking.size
        );
    }

    // Retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_concurrency == 0 {
        bail!("embedding.max_concurrency must be > 0");
    }

    // Chat
    match config.chat.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown chat provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.chat.is_enabled() && config.chat.model.is_none() {
        bail!(
            "chat.model must be specified when provider is '{}'",
            config.chat.provider
        );
    }

    // Storage
    if matches!(config.storage.mode, StorageMode::Object | StorageMode::Dual)
        && config.storage.object.is_none()
    {
        bail!(
            "storage.mode = '{}' requires a [storage.object] section",
            config.storage.mode
        );
    }
    if let Some(ref object) = config.storage.object {
        if object.bucket.is_empty() {
            bail!("storage.object.bucket must not be empty");
        }
    }

    // Seeded models
    for m in &config.models {
        if m.name.is_empty() {
            bail!("models[].name must not be empty");
        }
        if m.model_type == docqa_core::models::ModelType::Embedding && m.dims.unwrap_or(0) == 0 {
            bail!("embedding model '{}' must declare dims > 0", m.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/docqa.sqlite"
"#;

    #[test]
    fn test_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.storage.mode, StorageMode::Local);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.timeouts.embedding(), Duration::from_secs(30));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[chunking]
size = 100
overlap = 100
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunking.overlap"));
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[embedding]
provider = "openai"
model = "text-embedding-ada-002"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_dual_mode_requires_object_section() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[storage]
mode = "both"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("[storage.object]"));
    }

    #[test]
    fn test_storage_mode_aliases_and_models() {
        let config = parse_config(
            r#"
[db]
path = "x.sqlite"

[storage]
mode = "minio"

[storage.object]
bucket = "docs"
endpoint_url = "http://localhost:9000"

[[models]]
name = "nomic-embed-text"
type = "embedding"
base_url = "http://localhost:11434"
dims = 768
"#,
        )
        .unwrap();
        assert_eq!(config.storage.mode, StorageMode::Object);
        assert_eq!(config.storage.object.unwrap().region, "us-east-1");
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].resolved_provider(), "ollama");
    }

    #[test]
    fn test_unknown_storage_mode_rejected() {
        assert!(parse_config(
            r#"
[db]
path = "x.sqlite"

[storage]
mode = "tape"
"#
        )
        .is_err());
    }
}
