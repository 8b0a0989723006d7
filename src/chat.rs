//! Chat completion backends.
//!
//! OpenAI and Ollama both expose `POST {base}/chat/completions`; Ollama's
//! OpenAI-compatible surface lives under `/v1`.

use async_trait::async_trait;
use docqa_core::chat::{ChatBackend, ChatMessage, Role};
use docqa_core::models::LlmModelConfig;
use docqa_core::{RagError, Result};
use std::sync::Arc;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

pub struct OpenAiCompatChat {
    client: reqwest::Client,
    provider: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiCompatChat {
    pub fn new(model: &LlmModelConfig, default_temperature: f32, timeout: Duration) -> Result<Self> {
        let provider = model.resolved_provider();
        let (base_url, api_key) = match provider.as_str() {
            "openai" => {
                let key = model
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
                (
                    model.base_url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                    Some(key),
                )
            }
            "ollama" => (
                ollama_chat_base(model.base_url.as_deref()),
                model.api_key.clone(),
            ),
            other => {
                return Err(RagError::InvalidConfig(format!(
                    "unknown chat provider '{}' for model '{}'",
                    other, model.name
                )))
            }
        };

        let temperature = model
            .params
            .get("temperature")
            .and_then(|t| t.as_f64())
            .map(|t| t as f32)
            .unwrap_or(default_temperature);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::InvalidConfig(format!("chat http client: {}", e)))?;

        Ok(Self {
            client,
            provider,
            model: model.name.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature,
        })
    }
}

fn ollama_chat_base(base_url: Option<&str>) -> String {
    match base_url {
        Some(url) => {
            let url = url.trim_end_matches('/');
            if url.ends_with("/v1") {
                url.to_string()
            } else {
                format!("{}/v1", url)
            }
        }
        None => OLLAMA_BASE_URL.to_string(),
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatChat {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": role_name(m.role), "content": m.content}))
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            RagError::chat_transient(&self.provider, format!("request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = format!("API error {}: {}", status, body_text);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                RagError::chat_transient(&self.provider, message)
            } else {
                RagError::chat(&self.provider, message)
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            RagError::chat_transient(&self.provider, format!("invalid response body: {}", e))
        })?;
        parse_completion(&self.provider, &json)
    }
}

fn parse_completion(provider: &str, json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| RagError::chat(provider, "invalid response: missing choices[0].message.content"))
}

/// Instantiate the backend for a `chat` model entry.
pub fn create_backend(
    model: &LlmModelConfig,
    default_temperature: f32,
    timeout: Duration,
) -> Result<Arc<dyn ChatBackend>> {
    Ok(Arc::new(OpenAiCompatChat::new(
        model,
        default_temperature,
        timeout,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Paris.\n"}}]
        });
        assert_eq!(parse_completion("openai", &json).unwrap(), "Paris.");
        assert!(parse_completion("openai", &serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn test_ollama_chat_base_appends_v1() {
        assert_eq!(
            ollama_chat_base(Some("http://gpu:11434")),
            "http://gpu:11434/v1"
        );
        assert_eq!(
            ollama_chat_base(Some("http://gpu:11434/v1/")),
            "http://gpu:11434/v1"
        );
        assert_eq!(ollama_chat_base(None), OLLAMA_BASE_URL);
    }
}
