//! Embedding client: batching, concurrency limits, retries and dimension
//! checks on top of the registry's [`EmbeddingBackend`]s.
//!
//! # Retry Strategy
//!
//! Backends report failures once; the client retries transient ones:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: base, 2×, 4×, … (exponent capped at 5)
//!
//! A vector whose length differs from the model's declared dimension is a
//! [`RagError::DimensionMismatch`] and is never retried.

pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use docqa_core::embedding::{check_dims, EmbeddingBackend};
use docqa_core::{RagError, Result};
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::registry::ModelRegistry;
use crate::retry::{with_timeout, RetryPolicy};

pub struct EmbeddingClient {
    registry: Arc<ModelRegistry>,
    batch_size: usize,
    limiter: Arc<Semaphore>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(registry: Arc<ModelRegistry>, config: &EmbeddingConfig, timeout: Duration) -> Self {
        Self::with_settings(
            registry,
            config.batch_size,
            config.max_concurrency,
            RetryPolicy::new(config.max_retries, Duration::from_millis(config.retry_base_ms)),
            timeout,
        )
    }

    pub fn with_settings(
        registry: Arc<ModelRegistry>,
        batch_size: usize,
        max_concurrency: usize,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            batch_size: batch_size.max(1),
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            retry,
            timeout,
        }
    }

    /// Resolve `model_ref` (or the default embedding model).
    pub fn resolve(&self, model_ref: Option<&str>) -> Result<Arc<dyn EmbeddingBackend>> {
        self.registry.embedding(model_ref)
    }

    pub async fn embed_batch(
        &self,
        texts: &[String],
        model_ref: Option<&str>,
    ) -> Result<Vec<Vec<f32>>> {
        let backend = self.resolve(model_ref)?;
        self.embed_with(backend.as_ref(), texts).await
    }

    pub async fn embed_one(&self, text: &str, model_ref: Option<&str>) -> Result<Vec<f32>> {
        let backend = self.resolve(model_ref)?;
        self.embed_with(backend.as_ref(), &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding(backend.provider(), "empty embedding response"))
    }

    /// Embed `texts` with an already-resolved backend, returning one vector
    /// per input in input order.
    ///
    /// Sub-batches of `batch_size` run concurrently; every backend call
    /// holds a permit of the process-wide limiter.
    pub async fn embed_with(
        &self,
        backend: &dyn EmbeddingBackend,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches = texts
            .chunks(self.batch_size)
            .enumerate()
            .map(|(n, batch)| self.embed_sub_batch(backend, n, batch));
        let results = try_join_all(batches).await?;

        Ok(results.into_iter().flatten().collect())
    }

    async fn embed_sub_batch(
        &self,
        backend: &dyn EmbeddingBackend,
        n: usize,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let limiter = self.limiter.as_ref();
        let timeout = self.timeout;

        let vectors = self
            .retry
            .run("embedding", |attempt| async move {
                let _permit = limiter
                    .acquire()
                    .await
                    .map_err(|_| RagError::embedding(backend.provider(), "embedding limiter closed"))?;
                debug!(
                    model = backend.model_name(),
                    batch = n,
                    size = batch.len(),
                    attempt,
                    "embedding request"
                );
                with_timeout(timeout, "embedding request", backend.embed(batch)).await
            })
            .await
            .map_err(|e| match e {
                RagError::Timeout { .. } => {
                    RagError::embedding_transient(backend.provider(), e.to_string())
                }
                other => other,
            })?;

        if vectors.len() != batch.len() {
            return Err(RagError::embedding(
                backend.provider(),
                format!(
                    "backend returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                ),
            ));
        }
        check_dims(&vectors, backend.dims())?;
        Ok(vectors)
    }
}
