//! Capability directory.
//!
//! A persistent index of who answers for which capability. The resolver
//! consults it after the in-process registry misses, and the synthesizer
//! records every module it generates here so the next process finds it
//! without regenerating. Two implementations: [`MemoryDirectory`] for
//! tests and ephemeral runs, [`SqliteDirectory`] for real persistence.

mod sqlite;

pub use sqlite::SqliteDirectory;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    /// Qualified `module.function` name.
    pub capability: String,
    /// Where the implementation lives: a module file path, or `builtin`.
    pub provider: String,
    pub confidence: f64,
    pub auto_generated: bool,
    pub registered_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
}

impl CapabilityRecord {
    pub fn new(capability: impl Into<String>, provider: impl Into<String>) -> Self {
        CapabilityRecord {
            capability: capability.into(),
            provider: provider.into(),
            confidence: 1.0,
            auto_generated: false,
            registered_at: Utc::now().to_rfc3339(),
            last_used_at: None,
        }
    }

    pub fn generated(capability: impl Into<String>, provider: impl Into<String>) -> Self {
        CapabilityRecord {
            confidence: 0.6,
            auto_generated: true,
            ..CapabilityRecord::new(capability, provider)
        }
    }
}

#[async_trait]
pub trait CapabilityDirectory: Send + Sync {
    async fn resolve(&self, capability: &str) -> Result<Option<CapabilityRecord>, EngineError>;

    /// Insert or replace the record for its capability.
    async fn register(&self, record: CapabilityRecord) -> Result<(), EngineError>;

    /// Mark the capability as used now.
    async fn touch(&self, capability: &str) -> Result<(), EngineError>;

    async fn list(&self) -> Result<Vec<CapabilityRecord>, EngineError>;
}

/// Process-local directory, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    records: RwLock<HashMap<String, CapabilityRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        MemoryDirectory::default()
    }
}

#[async_trait]
impl CapabilityDirectory for MemoryDirectory {
    async fn resolve(&self, capability: &str) -> Result<Option<CapabilityRecord>, EngineError> {
        Ok(self.records.read().await.get(capability).cloned())
    }

    async fn register(&self, record: CapabilityRecord) -> Result<(), EngineError> {
        self.records
            .write()
            .await
            .insert(record.capability.clone(), record);
        Ok(())
    }

    async fn touch(&self, capability: &str) -> Result<(), EngineError> {
        if let Some(record) = self.records.write().await.get_mut(capability) {
            record.last_used_at = Some(Utc::now().to_rfc3339());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CapabilityRecord>, EngineError> {
        let mut records: Vec<CapabilityRecord> =
            self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.capability.cmp(&b.capability));
        Ok(records)
    }
}
