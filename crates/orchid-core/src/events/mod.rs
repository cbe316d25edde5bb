//! Engine lifecycle events.
//!
//! The engine emits structured notifications (run started/finished,
//! step failures, capability synthesis, document revisions) over a
//! broadcast channel. Subscribers receive every event emitted while
//! they hold a receiver; with no subscribers emission is a no-op.
//! Event delivery never blocks execution and a lagging subscriber
//! drops its oldest events, not the run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    RunStarted,
    RunFinished,
    StepFailed,
    SynthesisStarted,
    SynthesisSucceeded,
    SynthesisFailed,
    DocumentRevised,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub kind: EventKind,
    pub agent_id: String,
    pub data: Value,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, kind: EventKind, agent_id: &str, data: Value) {
        let event = EngineEvent {
            kind,
            agent_id: agent_id.to_string(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        };
        let _ = self.tx.send(event);
    }
}
