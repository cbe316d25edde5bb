//! Inference service.
//!
//! One seam for every model call the engine makes: the `llm.*` builtins
//! and the capability synthesizer all go through [`InferenceService`].
//! The default implementation speaks the Anthropic-compatible Messages
//! API over HTTP; tests swap in [`StaticInference`] with scripted
//! replies.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config::InferenceConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        InferenceRequest {
            prompt: prompt.into(),
            ..InferenceRequest::default()
        }
    }
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn complete(&self, request: InferenceRequest) -> Result<String, EngineError>;
}

/// Calls the Anthropic-compatible Messages API.
///
/// POST {base_url}
/// Headers:
///   x-api-key: {api_key}
///   anthropic-version: 2023-06-01
///   content-type: application/json
///
/// The API key is read from the configured environment variable at call
/// time (falling back to `ANTHROPIC_API_KEY`), so a long-lived process
/// picks up rotation without restart.
pub struct HttpInference {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl HttpInference {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(300)) // 5 min timeout
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
        }
    }

    fn api_key(&self) -> Result<String, EngineError> {
        std::env::var(&self.config.api_key_env)
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .map_err(|_| {
                EngineError::Inference(format!(
                    "no API key: set {} or ANTHROPIC_API_KEY",
                    self.config.api_key_env
                ))
            })
    }
}

#[async_trait]
impl InferenceService for HttpInference {
    async fn complete(&self, request: InferenceRequest) -> Result<String, EngineError> {
        let api_key = self.api_key()?;

        let mut body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": [
                {
                    "role": "user",
                    "content": request.prompt
                }
            ]
        });
        if let Some(system) = &request.system {
            body["system"] = serde_json::Value::String(system.clone());
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::Value::Number(
                serde_json::Number::from_f64(temp).unwrap_or_else(|| serde_json::Number::from(0)),
            );
        }

        tracing::info!(
            "[Inference] Calling {} (model: {})",
            self.config.base_url,
            self.config.model
        );

        let response = self
            .client
            .post(&self.config.base_url)
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Inference(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| EngineError::Inference(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(EngineError::Inference(format!(
                "API returned {}: {}",
                status, response_text
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| EngineError::Inference(format!("failed to parse response JSON: {}", e)))?;

        let content = parsed
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| {
                        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                            block
                                .get("text")
                                .and_then(|t| t.as_str())
                                .map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .reduce(|a, b| format!("{}\n{}", a, b))
            })
            .unwrap_or_default();

        if content.is_empty() {
            return Err(EngineError::Inference(
                "response carried no text content".to_string(),
            ));
        }
        Ok(content)
    }
}

/// Scripted inference for tests and offline runs: replies are handed
/// out in order, and an exhausted script is an inference error rather
/// than a silent empty string.
#[derive(Debug, Default)]
pub struct StaticInference {
    replies: Mutex<VecDeque<String>>,
}

impl StaticInference {
    pub fn new(replies: Vec<String>) -> Self {
        StaticInference {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl InferenceService for StaticInference {
    async fn complete(&self, _request: InferenceRequest) -> Result<String, EngineError> {
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| EngineError::Inference("reply queue poisoned".to_string()))?;
        replies
            .pop_front()
            .ok_or_else(|| EngineError::Inference("static inference exhausted".to_string()))
    }
}
