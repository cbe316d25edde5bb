//! `orchid run`: execute an operation from an agent document.

use std::sync::Arc;

use serde_json::{Map, Value};

use orchid_core::events::EventKind;
use orchid_core::{EngineConfig, Interpreter, RunRequest};

use super::print_json;
use crate::channel::StdioChannel;

pub async fn run(
    config: EngineConfig,
    file: &str,
    operation: &str,
    input_json: &str,
    client_id: Option<&str>,
    show_trace: bool,
) -> Result<(), String> {
    let input = parse_input(input_json)?;

    let engine = Interpreter::builder(config)
        .with_channel(Arc::new(StdioChannel::new()))
        .build()
        .await
        .map_err(|e| format!("engine startup failed: {}", e))?;
    tracing::info!("[Run] executing operation '{}' from '{}'", operation, file);

    // Progress notifications while the run is in flight
    let mut events = engine.events().subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let capability = event.data["capability"].as_str().unwrap_or("?");
            match event.kind {
                EventKind::SynthesisStarted => {
                    println!("🧬 Synthesizing missing capability '{}'...", capability)
                }
                EventKind::SynthesisSucceeded => {
                    println!("🧬 Capability '{}' is now available", capability)
                }
                EventKind::SynthesisFailed => {
                    println!("🧬 Could not synthesize '{}'", capability)
                }
                EventKind::DocumentRevised => {
                    println!("📝 Document '{}' revised itself", event.agent_id)
                }
                _ => {}
            }
        }
    });

    let mut request = RunRequest::new(file);
    request.operation = Some(operation.to_string());
    request.input = input;
    request.client_id = client_id.map(str::to_string);

    let outcome = engine.run(request).await;
    progress.abort();

    if show_trace {
        print_trace(&outcome.trace);
    }

    if outcome.success {
        match &outcome.result {
            Some(Value::Null) | None => println!("✅ Operation '{}' completed", operation),
            Some(result) => print_json(result),
        }
        Ok(())
    } else {
        Err(outcome
            .error
            .unwrap_or_else(|| format!("operation '{}' failed", operation)))
    }
}

/// Accepts a JSON object, `null` (empty input), or a bare scalar, which
/// arrives in the operation as `input.value`.
pub fn parse_input(raw: &str) -> Result<Map<String, Value>, String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("--input is not valid JSON: {}", e))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

fn print_trace(trace: &[orchid_core::context::TraceEntry]) {
    println!();
    println!("Trace ({} step(s)):", trace.len());
    for (index, entry) in trace.iter().enumerate() {
        let marker = if entry.success { "✅" } else { "❌" };
        match &entry.error {
            Some(error) => println!("  {}. {} {}: {}", index + 1, marker, entry.step, error),
            None => println!("  {}. {} {}", index + 1, marker, entry.step),
        }
    }
    println!();
}
