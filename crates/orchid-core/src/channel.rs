//! Outbound client channel.
//!
//! `respond` and `prompt.user` steps need a way back to whoever started
//! the run. The engine stays transport-agnostic: anything that can
//! deliver a message and (optionally) collect an answer implements
//! [`ChannelSink`]. The CLI binds stdio; a server would bind a socket
//! or message queue. With no sink bound, responses are logged and
//! prompts fail.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::EngineError;

#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Deliver a message to the client identified by `client_id`.
    async fn respond(&self, client_id: &str, message: &Value) -> Result<(), EngineError>;

    /// Put a question to the client and wait for the reply.
    async fn prompt(&self, client_id: &str, question: &str) -> Result<String, EngineError>;
}

/// In-memory sink: records every response and replays scripted prompt
/// answers in order. Used by tests and headless dry runs.
#[derive(Debug, Default)]
pub struct CollectingChannel {
    pub responses: Mutex<Vec<Value>>,
    answers: Mutex<VecDeque<String>>,
}

impl CollectingChannel {
    pub fn new() -> Self {
        CollectingChannel::default()
    }

    pub fn with_answers(answers: Vec<String>) -> Self {
        CollectingChannel {
            responses: Mutex::new(Vec::new()),
            answers: Mutex::new(answers.into()),
        }
    }

    pub fn recorded(&self) -> Vec<Value> {
        self.responses
            .lock()
            .map(|responses| responses.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChannelSink for CollectingChannel {
    async fn respond(&self, _client_id: &str, message: &Value) -> Result<(), EngineError> {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(message.clone());
        }
        Ok(())
    }

    async fn prompt(&self, _client_id: &str, _question: &str) -> Result<String, EngineError> {
        let mut answers = self
            .answers
            .lock()
            .map_err(|_| EngineError::Inference("answer queue poisoned".to_string()))?;
        answers
            .pop_front()
            .ok_or_else(|| EngineError::Inference("no scripted prompt answer left".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn collects_responses_and_replays_answers() {
        let channel = CollectingChannel::with_answers(vec!["yes".into()]);
        channel.respond("client-1", &json!("hello")).await.unwrap();
        assert_eq!(channel.recorded(), vec![json!("hello")]);
        assert_eq!(channel.prompt("client-1", "ok?").await.unwrap(), "yes");
        assert!(channel.prompt("client-1", "again?").await.is_err());
    }
}
