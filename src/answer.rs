//! Retrieval-augmented answering.
//!
//! ```text
//! accessible ids → keep processed → cache? → embed question
//!   → search each collection (filtered) → merge top-k → fit context
//!   → chat → history row + cache fill
//! ```
//!
//! Two outcomes are answers rather than errors: no accessible processed
//! documents ([`NO_ACCESSIBLE_CONTENT`]) and no hits ([`NO_RELEVANT_CONTENT`]).
//! Neither calls the chat backend nor writes history.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use docqa_core::chat::build_messages;
use docqa_core::retrieval::{
    access_fingerprint, assemble_context, merge_hits, normalize_question, ChunkRef,
};
use docqa_core::store::VectorStore;
use docqa_core::{RagError, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::access::AccessResolver;
use crate::cache::{AnswerCache, CachedAnswer};
use crate::documents::DocumentRepo;
use crate::embedding::EmbeddingClient;
use crate::registry::ModelRegistry;
use crate::retry::{with_timeout, RetryPolicy};

pub const NO_ACCESSIBLE_CONTENT: &str =
    "There is no accessible knowledge base content to answer this question.";
pub const NO_RELEVANT_CONTENT: &str =
    "I could not find relevant content in the knowledge base to answer this question.";

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub used_chunks: Vec<ChunkRef>,
    pub cached: bool,
}

impl Answer {
    fn fixed(text: &str) -> Self {
        Self {
            answer: text.to_string(),
            used_chunks: Vec::new(),
            cached: false,
        }
    }
}

/// Retrieval and chat settings for [`AnswerEngine`].
#[derive(Debug, Clone)]
pub struct AnswerSettings {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub chat_timeout: Duration,
    pub chat_retry: RetryPolicy,
    pub store_timeout: Duration,
}

pub struct AnswerEngine {
    docs: DocumentRepo,
    store: Arc<dyn VectorStore>,
    embedder: Arc<EmbeddingClient>,
    registry: Arc<ModelRegistry>,
    access: Arc<dyn AccessResolver>,
    cache: AnswerCache,
    settings: AnswerSettings,
}

impl AnswerEngine {
    pub fn new(
        docs: DocumentRepo,
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbeddingClient>,
        registry: Arc<ModelRegistry>,
        access: Arc<dyn AccessResolver>,
        cache: AnswerCache,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            docs,
            store,
            embedder,
            registry,
            access,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    /// Answer `question` for `user_id` over the documents the access
    /// resolver grants.
    ///
    /// The work runs on its own task: if the caller goes away, backend
    /// calls still complete and history is written once.
    pub async fn ask(self: &Arc<Self>, user_id: &str, question: &str) -> Result<Answer> {
        let engine = Arc::clone(self);
        let user_id = user_id.to_string();
        let question = question.to_string();
        tokio::spawn(async move {
            let accessible = engine.access.accessible_documents(&user_id).await?;
            engine.answer(&user_id, &question, &accessible).await
        })
        .await
        .map_err(|e| RagError::chat("engine", format!("answer task failed: {}", e)))?
    }

    /// Answer over an explicit accessible set.
    pub async fn answer(
        &self,
        user_id: &str,
        question: &str,
        accessible: &HashSet<String>,
    ) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidRequest("question must not be empty".to_string()));
        }

        let documents = self.docs.searchable(accessible).await?;
        if documents.is_empty() {
            debug!(user = %user_id, "no accessible processed documents");
            return Ok(Answer::fixed(NO_ACCESSIBLE_CONTENT));
        }
        let searchable: HashSet<String> = documents.iter().map(|d| d.id.clone()).collect();

        let cache_key = AnswerCache::key(
            &normalize_question(question),
            &access_fingerprint(&searchable),
        );
        if let Some(hit) = self.cache.get(&cache_key) {
            debug!(user = %user_id, "answer cache hit");
            return Ok(Answer {
                answer: hit.answer,
                used_chunks: hit.used_chunks,
                cached: true,
            });
        }

        let chat = self.registry.chat(None)?;
        let query = self.embedder.embed_one(question, None).await?;

        // Check every collection's shape before searching any of them so a
        // drifted model fails before the chat backend is reached.
        let mut collections = Vec::with_capacity(documents.len());
        for doc in &documents {
            match self.store.collection(&doc.vector_collection_name).await? {
                Some(spec) if spec.dims != query.len() => {
                    return Err(RagError::DimensionMismatch {
                        expected: spec.dims,
                        actual: query.len(),
                    })
                }
                Some(_) => collections.push(doc),
                None => debug!(document.id = %doc.id, "processed document has no collection"),
            }
        }

        let mut lists = Vec::with_capacity(collections.len());
        for doc in collections {
            // Each collection belongs to one document.
            let only = HashSet::from([doc.id.clone()]);
            let hits = with_timeout(
                self.settings.store_timeout,
                "vector search",
                self.store.search(
                    &doc.vector_collection_name,
                    &query,
                    self.settings.top_k,
                    &only,
                ),
            )
            .await?;
            lists.push(hits);
        }
        let hits = merge_hits(lists, self.settings.top_k);
        if hits.is_empty() {
            return Ok(Answer::fixed(NO_RELEVANT_CONTENT));
        }

        let window = assemble_context(hits, self.settings.max_context_chars);
        let used_chunks: Vec<ChunkRef> = window.used.iter().map(ChunkRef::from).collect();

        let messages = build_messages(question, &window.text);
        let answer = self
            .settings
            .chat_retry
            .run("chat", |_| {
                with_timeout(self.settings.chat_timeout, "chat completion", chat.complete(&messages))
            })
            .await
            .map_err(|e| match e {
                RagError::Timeout { .. } => RagError::chat_transient(chat.provider(), e.to_string()),
                other => other,
            })?;

        self.docs.insert_history(user_id, question, &answer).await?;
        self.cache.put(
            cache_key,
            CachedAnswer {
                answer: answer.clone(),
                used_chunks: used_chunks.clone(),
            },
        );

        info!(
            user = %user_id,
            chunks = used_chunks.len(),
            model = chat.model_name(),
            "question answered"
        );
        Ok(Answer {
            answer,
            used_chunks,
            cached: false,
        })
    }
}
