//! Builtin capability modules.
//!
//! The modules every document can call without anything on disk:
//!
//! - `log.debug/info/warn/error`: structured logging, returns the message
//! - `http.get/post/request`: outbound HTTP via the shared client
//! - `llm.complete/classify`: inference through the bound service
//! - `channel.respond/prompt`: delivery to the client behind the run
//! - `util.uuid/timestamp`: small value generators
//!
//! Builtins never trigger synthesis: an unknown function on any of them
//! is an operation-not-found error, not a missing capability.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{CapabilityProvider, CapabilityRegistry, ProviderServices};
use crate::error::EngineError;
use crate::llm::InferenceRequest;
use crate::template::render_scalar;

pub async fn register_builtins(registry: &CapabilityRegistry) {
    registry
        .register_builtin("log", std::sync::Arc::new(LogModule))
        .await;
    registry
        .register_builtin("http", std::sync::Arc::new(HttpModule))
        .await;
    registry
        .register_builtin("llm", std::sync::Arc::new(LlmModule))
        .await;
    registry
        .register_builtin("channel", std::sync::Arc::new(ChannelModule))
        .await;
    registry
        .register_builtin("util", std::sync::Arc::new(UtilModule))
        .await;
}

fn unknown(module: &str, function: &str) -> EngineError {
    EngineError::OperationNotFound {
        agent: module.to_string(),
        operation: function.to_string(),
    }
}

/// `{message}` object, shorthand `{value}`, bare scalar, or the whole
/// payload as fallback.
fn message_of(args: &Value) -> String {
    match args {
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("value"))
            .map(render_scalar)
            .unwrap_or_else(|| render_scalar(args)),
        other => render_scalar(other),
    }
}

fn str_field<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(text) = args.get(key).and_then(|v| v.as_str()) {
            return Some(text);
        }
    }
    args.as_str()
}

pub struct LogModule;

#[async_trait]
impl CapabilityProvider for LogModule {
    async fn invoke(
        &self,
        function: &str,
        args: Value,
        _services: &ProviderServices,
    ) -> Result<Value, EngineError> {
        let message = message_of(&args);
        match function {
            "debug" => tracing::debug!("[Agent] {}", message),
            "info" => tracing::info!("[Agent] {}", message),
            "warn" => tracing::warn!("[Agent] {}", message),
            "error" => tracing::error!("[Agent] {}", message),
            other => return Err(unknown("log", other)),
        }
        Ok(Value::String(message))
    }
}

pub struct HttpModule;

impl HttpModule {
    async fn perform(
        &self,
        method: &str,
        args: &Value,
        services: &ProviderServices,
    ) -> Result<Value, EngineError> {
        let url = str_field(args, &["url", "value"]).ok_or_else(|| {
            EngineError::step(format!("http.{method}"), "missing `url` argument")
        })?;

        let mut request = match method {
            "get" => services.http.get(url),
            "post" => services.http.post(url),
            "put" => services.http.put(url),
            "delete" => services.http.delete(url),
            other => {
                return Err(EngineError::step(
                    "http.request",
                    format!("unsupported method `{other}`"),
                ))
            }
        };
        if let Some(Value::Object(headers)) = args.get("headers") {
            for (name, value) in headers {
                request = request.header(name, render_scalar(value));
            }
        }
        if let Some(body) = args.get("body").or_else(|| args.get("json")) {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::step(format!("http.{method}"), e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::step(format!("http.{method}"), e))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(json!({
            "status": status.as_u16(),
            "ok": status.is_success(),
            "body": body,
        }))
    }
}

#[async_trait]
impl CapabilityProvider for HttpModule {
    async fn invoke(
        &self,
        function: &str,
        args: Value,
        services: &ProviderServices,
    ) -> Result<Value, EngineError> {
        match function {
            "get" | "post" => self.perform(function, &args, services).await,
            "request" => {
                let method = str_field(&args, &["method"])
                    .map(|m| m.to_ascii_lowercase())
                    .unwrap_or_else(|| "get".to_string());
                self.perform(&method, &args, services).await
            }
            other => Err(unknown("http", other)),
        }
    }
}

pub struct LlmModule;

#[async_trait]
impl CapabilityProvider for LlmModule {
    async fn invoke(
        &self,
        function: &str,
        args: Value,
        services: &ProviderServices,
    ) -> Result<Value, EngineError> {
        match function {
            "complete" => {
                let prompt =
                    str_field(&args, &["prompt", "text", "input", "value"]).ok_or_else(|| {
                        EngineError::step("llm.complete", "missing `prompt` argument")
                    })?;
                let request = InferenceRequest {
                    prompt: prompt.to_string(),
                    system: args
                        .get("system")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    max_tokens: args
                        .get("maxTokens")
                        .and_then(|v| v.as_u64())
                        .map(|n| n as u32),
                    temperature: args.get("temperature").and_then(|v| v.as_f64()),
                };
                let text = services.inference.complete(request).await?;
                Ok(json!({ "text": text }))
            }
            "classify" => {
                let input = str_field(&args, &["input", "text", "value"]).ok_or_else(|| {
                    EngineError::step("llm.classify", "missing `input` argument")
                })?;
                let categories: Vec<String> = args
                    .get("categories")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().map(render_scalar).collect())
                    .unwrap_or_default();
                if categories.is_empty() {
                    return Err(EngineError::step(
                        "llm.classify",
                        "missing `categories` argument",
                    ));
                }

                let prompt = format!(
                    "Classify the following input into exactly one of these categories: {}.\n\
                     Reply with the category name only.\n\nInput: {}",
                    categories.join(", "),
                    input
                );
                let raw = services.inference.complete(InferenceRequest::new(prompt)).await?;
                let reply = raw.trim().to_lowercase();
                let category = categories
                    .iter()
                    .find(|c| c.to_lowercase() == reply)
                    .or_else(|| categories.iter().find(|c| reply.contains(&c.to_lowercase())))
                    .cloned()
                    .unwrap_or_else(|| raw.trim().to_string());
                Ok(json!({ "category": category, "raw": raw.trim() }))
            }
            other => Err(unknown("llm", other)),
        }
    }
}

pub struct ChannelModule;

#[async_trait]
impl CapabilityProvider for ChannelModule {
    async fn invoke(
        &self,
        function: &str,
        args: Value,
        services: &ProviderServices,
    ) -> Result<Value, EngineError> {
        match function {
            "respond" => {
                let message = match &args {
                    Value::Object(map) => map
                        .get("message")
                        .or_else(|| map.get("value"))
                        .cloned()
                        .unwrap_or_else(|| args.clone()),
                    other => other.clone(),
                };
                match &services.channel {
                    Some(channel) => channel.respond(&services.client_id, &message).await?,
                    None => tracing::info!(
                        "[Channel] response for {}: {}",
                        services.client_id,
                        render_scalar(&message)
                    ),
                }
                Ok(message)
            }
            "prompt" => {
                let question = str_field(&args, &["question", "message", "prompt", "value"])
                    .ok_or_else(|| {
                        EngineError::step("channel.prompt", "missing `question` argument")
                    })?;
                let channel = services.channel.as_ref().ok_or_else(|| {
                    EngineError::step("channel.prompt", "no channel bound for this run")
                })?;
                let answer = channel.prompt(&services.client_id, question).await?;
                Ok(json!({ "answer": answer }))
            }
            other => Err(unknown("channel", other)),
        }
    }
}

pub struct UtilModule;

#[async_trait]
impl CapabilityProvider for UtilModule {
    async fn invoke(
        &self,
        function: &str,
        _args: Value,
        _services: &ProviderServices,
    ) -> Result<Value, EngineError> {
        match function {
            "uuid" => Ok(Value::String(Uuid::new_v4().to_string())),
            "timestamp" => Ok(Value::String(Utc::now().to_rfc3339())),
            other => Err(unknown("util", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StaticInference;
    use std::sync::Arc;

    fn services_with(replies: Vec<&str>) -> ProviderServices {
        ProviderServices {
            inference: Arc::new(StaticInference::new(
                replies.into_iter().map(String::from).collect(),
            )),
            channel: None,
            http: reqwest::Client::new(),
            client_id: "test-client".to_string(),
        }
    }

    #[tokio::test]
    async fn log_returns_its_message() {
        let out = LogModule
            .invoke("info", json!({ "message": "hello" }), &services_with(vec![]))
            .await
            .unwrap();
        assert_eq!(out, json!("hello"));
    }

    #[tokio::test]
    async fn unknown_function_is_not_a_missing_capability() {
        let err = LogModule
            .invoke("shout", json!("hi"), &services_with(vec![]))
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, EngineError::OperationNotFound { .. }));
    }

    #[tokio::test]
    async fn complete_wraps_inference_reply() {
        let out = LlmModule
            .invoke(
                "complete",
                json!({ "prompt": "say hi" }),
                &services_with(vec!["hi there"]),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({ "text": "hi there" }));
    }

    #[tokio::test]
    async fn classify_matches_categories_loosely() {
        let out = LlmModule
            .invoke(
                "classify",
                json!({ "input": "the build is broken", "categories": ["Bug", "Feature"] }),
                &services_with(vec!["  bug\n"]),
            )
            .await
            .unwrap();
        assert_eq!(out["category"], json!("Bug"));
    }

    #[tokio::test]
    async fn respond_without_channel_logs_and_returns() {
        let out = ChannelModule
            .invoke("respond", json!({ "message": "done" }), &services_with(vec![]))
            .await
            .unwrap();
        assert_eq!(out, json!("done"));
    }

    #[tokio::test]
    async fn prompt_without_channel_fails() {
        let err = ChannelModule
            .invoke("prompt", json!({ "question": "ok?" }), &services_with(vec![]))
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn util_generates_values() {
        let services = services_with(vec![]);
        let id = UtilModule.invoke("uuid", Value::Null, &services).await.unwrap();
        assert_eq!(id.as_str().unwrap().len(), 36);
        let ts = UtilModule
            .invoke("timestamp", Value::Null, &services)
            .await
            .unwrap();
        assert!(ts.as_str().unwrap().contains('T'));
    }
}
