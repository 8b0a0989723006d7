//! Chat-completion backend trait and grounded prompt construction.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A model that completes a conversation.
///
/// One call per invocation; retries and timeouts belong to the caller.
/// Retryable failures are reported as a transient
/// [`RagError::ChatBackendError`](crate::error::RagError::ChatBackendError).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn provider(&self) -> &str;
    fn model_name(&self) -> &str;
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You are a knowledge base assistant. Answer the user's question \
using only the provided context. If the context does not contain the answer, say that you \
could not find it in the knowledge base. Answer in the language of the question.";

/// Build the grounded prompt for `question` over an assembled `context`.
pub fn build_messages(question: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}",
            context,
            question.trim()
        )),
    ]
}
