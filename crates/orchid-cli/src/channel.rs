//! Terminal client channel.
//!
//! Binds `respond` and `prompt.user` steps to the terminal: responses
//! print to stdout, prompts read one line from stdin. Stdin reads run
//! on the blocking pool so a waiting prompt never stalls the runtime.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use serde_json::Value;

use orchid_core::channel::ChannelSink;
use orchid_core::EngineError;

#[derive(Debug, Default)]
pub struct StdioChannel;

impl StdioChannel {
    pub fn new() -> Self {
        StdioChannel
    }
}

#[async_trait]
impl ChannelSink for StdioChannel {
    async fn respond(&self, _client_id: &str, message: &Value) -> Result<(), EngineError> {
        match message {
            Value::String(text) => println!("💬 {}", text),
            other => println!(
                "💬 {}",
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
            ),
        }
        Ok(())
    }

    async fn prompt(&self, _client_id: &str, question: &str) -> Result<String, EngineError> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            print!("❓ {} ", question);
            io::stdout().flush()?;
            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer)?;
            Ok::<String, io::Error>(answer.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(|e| EngineError::Inference(format!("stdin prompt task failed: {}", e)))?
        .map_err(EngineError::from)
    }
}
