//! Capability registry and resolution.
//!
//! Every `module.function` step resolves here. A capability is either a
//! builtin (a Rust [`CapabilityProvider`] compiled into the engine) or a
//! module (an agent document on disk whose operations are the module's
//! functions). The registry maps module names to capabilities; the
//! [`resolver`] layers the capability directory and runtime synthesis on
//! top, so a call to a module nobody wrote yet can still succeed.
//!
//! Resolution order for `module.function`:
//!   1. in-process registry (builtins, then loaded modules)
//!   2. capability directory (modules registered by earlier processes)
//!   3. the conventional `<modules_dir>/<module>.yaml` path
//!   4. synthesis: generate the module, register it, retry once
//!
//! Only a genuine "nothing answers for this module" miss reaches step 4.
//! A module that exists but lacks the function, or a capability that
//! resolved and then failed while running, propagates its error without
//! regeneration.

pub mod builtins;
pub mod resolver;
pub mod synthesis;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::channel::ChannelSink;
use crate::error::EngineError;
use crate::llm::InferenceService;

/// Everything a builtin may need beyond its arguments. Constructed per
/// run so the client identity travels with the call.
#[derive(Clone)]
pub struct ProviderServices {
    pub inference: Arc<dyn InferenceService>,
    pub channel: Option<Arc<dyn ChannelSink>>,
    pub http: reqwest::Client,
    pub client_id: String,
}

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Invoke `function` with already-resolved arguments. Unknown
    /// functions fail with [`EngineError::OperationNotFound`], which
    /// never triggers synthesis.
    async fn invoke(
        &self,
        function: &str,
        args: Value,
        services: &ProviderServices,
    ) -> Result<Value, EngineError>;
}

/// A document-backed module: operations are the callable functions.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    pub module: String,
    pub path: PathBuf,
    pub auto_generated: bool,
}

#[derive(Clone)]
pub enum Capability {
    Builtin(Arc<dyn CapabilityProvider>),
    Module(ModuleRef),
}

#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        CapabilityRegistry::default()
    }

    pub async fn register_builtin(&self, module: &str, provider: Arc<dyn CapabilityProvider>) {
        self.entries
            .write()
            .await
            .insert(module.to_string(), Capability::Builtin(provider));
    }

    /// Register a document-backed module. Builtins cannot be shadowed.
    pub async fn register_module(&self, reference: ModuleRef) -> Result<(), EngineError> {
        let mut entries = self.entries.write().await;
        if let Some(Capability::Builtin(_)) = entries.get(&reference.module) {
            return Err(EngineError::Generation {
                capability: reference.module.clone(),
                reason: "refusing to shadow a builtin module".to_string(),
            });
        }
        tracing::info!(
            "[Registry] registered module {} from {}",
            reference.module,
            reference.path.display()
        );
        entries.insert(reference.module.clone(), Capability::Module(reference));
        Ok(())
    }

    pub async fn lookup(&self, module: &str) -> Option<Capability> {
        self.entries.read().await.get(module).cloned()
    }

    pub async fn is_builtin(&self, module: &str) -> bool {
        matches!(
            self.entries.read().await.get(module),
            Some(Capability::Builtin(_))
        )
    }

    pub async fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Splits a step key into module and function. A bare name with no dot
/// addresses the module's `default` function.
pub fn split_capability(name: &str) -> (String, String) {
    match name.split_once('.') {
        Some((module, function)) => (module.to_string(), function.to_string()),
        None => (name.to_string(), "default".to_string()),
    }
}
