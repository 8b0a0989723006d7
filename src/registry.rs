//! Typed model registry.
//!
//! Maps `(ModelType, name)` to a capability object: an
//! [`EmbeddingBackend`] for `embedding` models, a [`ChatBackend`] for
//! `chat` models. Entries come from three layers, later layers overriding
//! earlier ones for the same key:
//!
//! ```text
//! [embedding]/[chat] defaults → [[models]] seeds → llm_models rows
//! ```
//!
//! The registry is built once at startup and shared read-only. Resolution
//! failure is always [`RagError::ModelNotFound`].

use std::collections::HashMap;
use std::sync::Arc;

use docqa_core::chat::ChatBackend;
use docqa_core::embedding::EmbeddingBackend;
use docqa_core::models::{LlmModelConfig, ModelType};
use docqa_core::{RagError, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::config::Config;
use crate::documents::db_err;

#[derive(Clone)]
pub enum Capability {
    Embed(Arc<dyn EmbeddingBackend>),
    Chat(Arc<dyn ChatBackend>),
}

/// Where a registry entry was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Config,
    Database,
    Runtime,
}

/// Listing row for `docqa models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub provider: String,
    pub dims: Option<usize>,
    pub source: ModelSource,
    pub is_default: bool,
}

#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<(ModelType, String), (Capability, ModelInfo)>,
    default_embedding: Option<String>,
    default_chat: Option<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration and the `llm_models` table.
    ///
    /// Entries whose backend cannot be constructed (missing key, unknown
    /// provider) are skipped with a warning; resolving them later yields
    /// `ModelNotFound`.
    pub async fn load(config: &Config, pool: &SqlitePool) -> Result<Self> {
        let mut layered: HashMap<(ModelType, String), (LlmModelConfig, ModelSource)> =
            HashMap::new();

        let mut registry = Self::new();
        if let Some(seed) = default_embedding_seed(config) {
            registry.default_embedding = Some(seed.name.clone());
            layered.insert((seed.model_type, seed.name.clone()), (seed, ModelSource::Config));
        }
        if let Some(seed) = default_chat_seed(config) {
            registry.default_chat = Some(seed.name.clone());
            layered.insert((seed.model_type, seed.name.clone()), (seed, ModelSource::Config));
        }
        for seed in &config.models {
            layered.insert(
                (seed.model_type, seed.name.clone()),
                (seed.clone(), ModelSource::Config),
            );
        }
        for row in load_models(pool).await? {
            layered.insert((row.model_type, row.name.clone()), (row, ModelSource::Database));
        }

        for ((model_type, name), (model, source)) in layered {
            if !model.is_usable() {
                debug!(model = %name, "skipping inactive model");
                continue;
            }
            let capability = match model_type {
                ModelType::Embedding => {
                    crate::embedding::providers::create_backend(&model, config.timeouts.embedding())
                        .map(Capability::Embed)
                }
                ModelType::Chat => crate::chat::create_backend(
                    &model,
                    config.chat.temperature,
                    config.timeouts.chat(),
                )
                .map(Capability::Chat),
                ModelType::Rerank => {
                    debug!(model = %name, "rerank models are not used; skipping");
                    continue;
                }
            };
            match capability {
                Ok(capability) => registry.insert(capability, &model, source),
                Err(e) => warn!(model = %name, kind = %model_type, error = %e, "model unavailable"),
            }
        }

        Ok(registry)
    }

    fn insert(&mut self, capability: Capability, model: &LlmModelConfig, source: ModelSource) {
        let (model_type, dims) = match &capability {
            Capability::Embed(backend) => (ModelType::Embedding, Some(backend.dims())),
            Capability::Chat(_) => (ModelType::Chat, None),
        };
        let info = ModelInfo {
            name: model.name.clone(),
            model_type,
            provider: model.resolved_provider(),
            dims,
            source,
            is_default: false,
        };
        self.models
            .insert((model_type, model.name.clone()), (capability, info));
    }

    /// Register an embedding backend under its model name. The first
    /// registered embedding model becomes the default when none is set.
    pub fn register_embedding(&mut self, backend: Arc<dyn EmbeddingBackend>) {
        let name = backend.model_name().to_string();
        let info = ModelInfo {
            name: name.clone(),
            model_type: ModelType::Embedding,
            provider: backend.provider().to_string(),
            dims: Some(backend.dims()),
            source: ModelSource::Runtime,
            is_default: false,
        };
        if self.default_embedding.is_none() {
            self.default_embedding = Some(name.clone());
        }
        self.models
            .insert((ModelType::Embedding, name), (Capability::Embed(backend), info));
    }

    pub fn register_chat(&mut self, backend: Arc<dyn ChatBackend>) {
        let name = backend.model_name().to_string();
        let info = ModelInfo {
            name: name.clone(),
            model_type: ModelType::Chat,
            provider: backend.provider().to_string(),
            dims: None,
            source: ModelSource::Runtime,
            is_default: false,
        };
        if self.default_chat.is_none() {
            self.default_chat = Some(name.clone());
        }
        self.models
            .insert((ModelType::Chat, name), (Capability::Chat(backend), info));
    }

    pub fn resolve(&self, model_type: ModelType, name: &str) -> Result<Capability> {
        self.models
            .get(&(model_type, name.to_string()))
            .map(|(capability, _)| capability.clone())
            .ok_or_else(|| RagError::ModelNotFound {
                kind: model_type,
                name: name.to_string(),
            })
    }

    /// Resolve an embedding model, falling back to the default.
    pub fn embedding(&self, name: Option<&str>) -> Result<Arc<dyn EmbeddingBackend>> {
        let name = pick(ModelType::Embedding, name, self.default_embedding.as_deref())?;
        match self.resolve(ModelType::Embedding, name)? {
            Capability::Embed(backend) => Ok(backend),
            Capability::Chat(_) => Err(RagError::ModelNotFound {
                kind: ModelType::Embedding,
                name: name.to_string(),
            }),
        }
    }

    /// Resolve a chat model, falling back to the default.
    pub fn chat(&self, name: Option<&str>) -> Result<Arc<dyn ChatBackend>> {
        let name = pick(ModelType::Chat, name, self.default_chat.as_deref())?;
        match self.resolve(ModelType::Chat, name)? {
            Capability::Chat(backend) => Ok(backend),
            Capability::Embed(_) => Err(RagError::ModelNotFound {
                kind: ModelType::Chat,
                name: name.to_string(),
            }),
        }
    }

    pub fn default_embedding_name(&self) -> Option<&str> {
        self.default_embedding.as_deref()
    }

    /// Every usable model, sorted by type then name.
    pub fn list(&self) -> Vec<ModelInfo> {
        let mut out: Vec<ModelInfo> = self
            .models
            .values()
            .map(|(_, info)| {
                let mut info = info.clone();
                info.is_default = match info.model_type {
                    ModelType::Embedding => self.default_embedding.as_deref() == Some(&info.name),
                    ModelType::Chat => self.default_chat.as_deref() == Some(&info.name),
                    ModelType::Rerank => false,
                };
                info
            })
            .collect();
        out.sort_by(|a, b| {
            a.model_type
                .as_str()
                .cmp(b.model_type.as_str())
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }
}

fn pick<'a>(
    kind: ModelType,
    requested: Option<&'a str>,
    default: Option<&'a str>,
) -> Result<&'a str> {
    requested
        .filter(|n| !n.is_empty())
        .or(default)
        .ok_or_else(|| RagError::ModelNotFound {
            kind,
            name: "<default>".to_string(),
        })
}

fn default_embedding_seed(config: &Config) -> Option<LlmModelConfig> {
    if !config.embedding.is_enabled() {
        return None;
    }
    let name = config.embedding.model.clone()?;
    Some(LlmModelConfig {
        name,
        model_type: ModelType::Embedding,
        provider: Some(config.embedding.provider.clone()),
        api_key: config.embedding.api_key.clone(),
        base_url: config.embedding.url.clone(),
        dims: config.embedding.dims,
        params: serde_json::Value::Null,
        is_active: true,
        is_deleted: false,
    })
}

fn default_chat_seed(config: &Config) -> Option<LlmModelConfig> {
    if !config.chat.is_enabled() {
        return None;
    }
    let name = config.chat.model.clone()?;
    Some(LlmModelConfig {
        name,
        model_type: ModelType::Chat,
        provider: Some(config.chat.provider.clone()),
        api_key: config.chat.api_key.clone(),
        base_url: config.chat.url.clone(),
        dims: None,
        params: serde_json::json!({ "temperature": config.chat.temperature }),
        is_active: true,
        is_deleted: false,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// llm_models table
// ═══════════════════════════════════════════════════════════════════════

/// Active, non-deleted rows of `llm_models`.
pub async fn load_models(pool: &SqlitePool) -> Result<Vec<LlmModelConfig>> {
    let rows = sqlx::query(
        "SELECT name, type, provider, api_key, base_url, dims, params_json, is_active, is_deleted
         FROM llm_models WHERE is_active = 1 AND is_deleted = 0 ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    let mut models = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.get("name");
        let kind: String = row.get("type");
        let Some(model_type) = ModelType::parse(&kind) else {
            warn!(model = %name, kind = %kind, "ignoring model with unknown type");
            continue;
        };
        let params_json: String = row.get("params_json");
        let dims: Option<i64> = row.get("dims");
        let is_active: i64 = row.get("is_active");
        let is_deleted: i64 = row.get("is_deleted");
        models.push(LlmModelConfig {
            name,
            model_type,
            provider: row.get("provider"),
            api_key: row.get("api_key"),
            base_url: row.get("base_url"),
            dims: dims.map(|d| d as usize),
            params: serde_json::from_str(&params_json).unwrap_or(serde_json::Value::Null),
            is_active: is_active != 0,
            is_deleted: is_deleted != 0,
        });
    }
    Ok(models)
}

/// Insert or update a model row by name.
pub async fn save_model(pool: &SqlitePool, model: &LlmModelConfig) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let params = if model.params.is_null() {
        "{}".to_string()
    } else {
        model.params.to_string()
    };
    sqlx::query(
        r#"
        INSERT INTO llm_models (name, type, provider, api_key, base_url, dims, params_json,
            is_active, is_deleted, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            type = excluded.type,
            provider = excluded.provider,
            api_key = excluded.api_key,
            base_url = excluded.base_url,
            dims = excluded.dims,
            params_json = excluded.params_json,
            is_active = excluded.is_active,
            is_deleted = excluded.is_deleted,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&model.name)
    .bind(model.model_type.as_str())
    .bind(&model.provider)
    .bind(&model.api_key)
    .bind(&model.base_url)
    .bind(model.dims.map(|d| d as i64))
    .bind(params)
    .bind(model.is_active as i64)
    .bind(model.is_deleted as i64)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(db_err)?;
    Ok(())
}
