//! The interpreter: public entry point and owner of every engine service.
//!
//! A run goes through four phases:
//!
//! 1. resolve and load the document (static key, directory record,
//!    literal path, then a heuristic search over the agent directories),
//!    swapping in the head revision when the agent has been modified;
//! 2. build an execution context from the request;
//! 3. hand the operation's steps to the executor;
//! 4. evaluate the standing concern on the final context, then fold
//!    everything into a [`RunOutcome`].
//!
//! `run` never returns `Err`: load failures, missing operations, and step
//! errors all come back as `RunOutcome { success: false, .. }` with
//! whatever trace was accumulated, so callers always get a diagnosable
//! envelope.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capability::builtins::register_builtins;
use crate::capability::resolver;
use crate::capability::synthesis::{self, SynthesisLocks};
use crate::capability::{CapabilityRegistry, ModuleRef, ProviderServices};
use crate::channel::ChannelSink;
use crate::config::EngineConfig;
use crate::context::{ContextOptions, ContextSnapshot, ExecutionContext, TraceEntry};
use crate::directory::{CapabilityDirectory, SqliteDirectory};
use crate::document::{parse_steps, AgentDocument, DocumentLoader};
use crate::error::EngineError;
use crate::events::{EventBus, EventKind};
use crate::executor::{self, StepFlow};
use crate::expr;
use crate::llm::{HttpInference, InferenceRequest, InferenceService};
use crate::revision::RevisionStore;

/// One workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Document reference: a path, an agent id the directory knows, or a
    /// bare name searched across the agent directories.
    pub file: String,
    /// Operation to run; `default` when omitted.
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RunRequest {
    pub fn new(file: impl Into<String>) -> Self {
        RunRequest {
            file: file.into(),
            operation: None,
            input: Map::new(),
            client_id: None,
            metadata: Map::new(),
        }
    }
}

/// What a run produced, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub context: ContextSnapshot,
    pub trace: Vec<TraceEntry>,
}

/// Internal run result that still carries the live context.
struct DrivenRun {
    outcome: Result<Value, EngineError>,
    context: ExecutionContext,
}

pub struct Interpreter {
    config: EngineConfig,
    loader: DocumentLoader,
    registry: CapabilityRegistry,
    directory: Arc<dyn CapabilityDirectory>,
    inference: Arc<dyn InferenceService>,
    channel: Option<Arc<dyn ChannelSink>>,
    revisions: RevisionStore,
    events: EventBus,
    synthesis: SynthesisLocks,
    http: reqwest::Client,
}

pub struct InterpreterBuilder {
    config: EngineConfig,
    directory: Option<Arc<dyn CapabilityDirectory>>,
    inference: Option<Arc<dyn InferenceService>>,
    channel: Option<Arc<dyn ChannelSink>>,
}

impl InterpreterBuilder {
    /// Overrides the SQLite-backed default, e.g. with `MemoryDirectory`.
    pub fn with_directory(mut self, directory: Arc<dyn CapabilityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_inference(mut self, inference: Arc<dyn InferenceService>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn ChannelSink>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub async fn build(self) -> Result<Interpreter, EngineError> {
        let config = self.config;

        let mut loader = DocumentLoader::new(config.cache_ttl());
        loader.register_static(synthesis::GENERATOR_KEY, synthesis::generator_document()?);

        let registry = CapabilityRegistry::new();
        register_builtins(&registry).await;

        let directory: Arc<dyn CapabilityDirectory> = match self.directory {
            Some(directory) => directory,
            None => {
                std::fs::create_dir_all(&config.data_dir)?;
                Arc::new(SqliteDirectory::open(&config.data_dir.join("directory.db"))?)
            }
        };

        let inference: Arc<dyn InferenceService> = self
            .inference
            .unwrap_or_else(|| Arc::new(HttpInference::new(config.inference.clone())));

        let revisions = RevisionStore::new(config.data_dir.join("revisions"));

        Ok(Interpreter {
            config,
            loader,
            registry,
            directory,
            inference,
            channel: self.channel,
            revisions,
            events: EventBus::new(),
            synthesis: SynthesisLocks::new(),
            http: reqwest::Client::new(),
        })
    }
}

impl Interpreter {
    pub fn builder(config: EngineConfig) -> InterpreterBuilder {
        InterpreterBuilder {
            config,
            directory: None,
            inference: None,
            channel: None,
        }
    }

    /// Runs one operation of one document. Never returns `Err`.
    pub async fn run(&self, request: RunRequest) -> RunOutcome {
        let operation = request
            .operation
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let document = match self.load_document(&request.file).await {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!("[Interpreter] could not load {}: {}", request.file, err);
                return RunOutcome {
                    success: false,
                    result: None,
                    error: Some(err.to_string()),
                    context: ContextSnapshot::default(),
                    trace: Vec::new(),
                };
            }
        };

        self.events.emit(
            EventKind::RunStarted,
            &document.identity.id,
            json!({ "operation": operation }),
        );
        tracing::info!(
            "[Interpreter] running {}::{} for client {}",
            document.identity.id,
            operation,
            request.client_id.as_deref().unwrap_or("system")
        );

        let driven = self
            .execute_document(
                &document,
                &operation,
                request.input,
                request.client_id,
                request.metadata,
            )
            .await;

        let outcome = match driven.outcome {
            Ok(result) => RunOutcome {
                success: true,
                result: Some(result),
                error: None,
                context: driven.context.snapshot(),
                trace: driven.context.trace,
            },
            Err(err) => RunOutcome {
                success: false,
                result: None,
                error: Some(err.to_string()),
                context: driven.context.snapshot(),
                trace: driven.context.trace,
            },
        };

        self.events.emit(
            EventKind::RunFinished,
            &document.identity.id,
            json!({ "operation": operation, "success": outcome.success }),
        );
        outcome
    }

    /// Shared core: build a context, run the operation, run the concern.
    async fn execute_document(
        &self,
        document: &AgentDocument,
        operation: &str,
        input: Map<String, Value>,
        client_id: Option<String>,
        metadata: Map<String, Value>,
    ) -> DrivenRun {
        let mut ctx = ExecutionContext::create(ContextOptions {
            agent_id: Some(document.identity.id.clone()),
            client_id,
            operation: Some(operation.to_string()),
            input,
            metadata,
        });

        let outcome = match document.operations.get(operation) {
            Some(steps) => executor::execute_steps(self, document, &mut ctx, steps)
                .await
                .map(StepFlow::into_value),
            None => Err(EngineError::OperationNotFound {
                agent: document.identity.id.clone(),
                operation: operation.to_string(),
            }),
        };

        self.run_concern(document, &mut ctx).await;

        DrivenRun {
            outcome,
            context: ctx,
        }
    }

    /// The standing concern runs on the final context, after success and
    /// failure alike. Its own failures are logged, never propagated.
    async fn run_concern(&self, document: &AgentDocument, ctx: &mut ExecutionContext) {
        let Some(concern) = &document.concern else {
            return;
        };
        if !expr::evaluate(&concern.condition, ctx) {
            return;
        }
        tracing::info!(
            "[Interpreter] concern fired for {}: {}",
            document.identity.id,
            concern.condition
        );
        if let Err(err) = executor::execute_steps(self, document, ctx, &concern.action).await {
            tracing::warn!(
                "[Interpreter] concern action for {} failed: {}",
                document.identity.id,
                err
            );
        }
    }

    /// Resolves a document reference: static key, then a directory
    /// record naming a file, then the literal path, then each agent
    /// directory with and without an extension.
    pub async fn load_document(&self, reference: &str) -> Result<Arc<AgentDocument>, EngineError> {
        if self.loader.is_static(reference) {
            return self.loader.load(Path::new(reference)).await;
        }

        match self.directory.resolve(reference).await {
            Ok(Some(record)) => {
                let path = PathBuf::from(&record.provider);
                if path.exists() {
                    let document = self.loader.load(&path).await?;
                    return Ok(self.with_head_revision(document).await);
                }
                tracing::warn!(
                    "[Interpreter] directory points {} at missing file {}",
                    reference,
                    record.provider
                );
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    "[Interpreter] directory lookup for {} failed: {}",
                    reference,
                    err
                );
            }
        }

        let literal = Path::new(reference);
        if literal.exists() {
            let document = self.loader.load(literal).await?;
            return Ok(self.with_head_revision(document).await);
        }

        for dir in &self.config.agent_dirs {
            for suffix in ["", ".yaml", ".yml", ".json"] {
                let candidate = dir.join(format!("{reference}{suffix}"));
                if candidate.exists() {
                    let document = self.loader.load(&candidate).await?;
                    return Ok(self.with_head_revision(document).await);
                }
            }
        }

        Err(EngineError::NotFound(reference.to_string()))
    }

    /// A revised agent takes effect on its next load: when `HEAD` names
    /// a snapshot, that snapshot replaces the source document.
    async fn with_head_revision(&self, base: Arc<AgentDocument>) -> Arc<AgentDocument> {
        match self.revisions.current(&base.identity.id) {
            Ok(Some(content)) => match AgentDocument::from_str(&content) {
                Ok(revised) => {
                    tracing::debug!(
                        "[Interpreter] using head revision of {}",
                        base.identity.id
                    );
                    Arc::new(revised)
                }
                Err(err) => {
                    tracing::warn!(
                        "[Interpreter] head revision of {} does not parse, using source: {}",
                        base.identity.id,
                        err
                    );
                    base
                }
            },
            Ok(None) => base,
            Err(err) => {
                tracing::warn!(
                    "[Interpreter] revision lookup for {} failed: {}",
                    base.identity.id,
                    err
                );
                base
            }
        }
    }

    /// `run` step: resolve the reference, run the operation, hand back
    /// the result. The sub-run's trace stays with the sub-run.
    pub(crate) async fn run_for_step(
        &self,
        reference: &str,
        operation: Option<&str>,
        input: Map<String, Value>,
        parent: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let document = self.load_document(reference).await?;
        let operation = operation.unwrap_or("default");
        let driven = self
            .execute_document(
                &document,
                operation,
                input,
                Some(parent.identity.client_id.clone()),
                Map::new(),
            )
            .await;
        driven.outcome
    }

    /// Invocation of one function on a document-backed module, used by
    /// the capability resolver. The module runs isolated: fresh context,
    /// the caller's client identity, the call arguments as input.
    pub(crate) async fn run_module(
        &self,
        reference: &ModuleRef,
        function: &str,
        args: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let document = self.loader.load(&reference.path).await?;
        if !document.has_operation(function) {
            return Err(EngineError::OperationNotFound {
                agent: reference.module.clone(),
                operation: function.to_string(),
            });
        }

        let input = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let driven = self
            .execute_document(
                &document,
                function,
                input,
                Some(ctx.identity.client_id.clone()),
                Map::new(),
            )
            .await;
        driven.outcome
    }

    /// Runs the module generator workflow and returns its raw text
    /// reply. Anything but a non-empty string is a generation failure.
    pub(crate) async fn run_generator(
        &self,
        capability: &str,
        module: &str,
        function: &str,
        reason: &str,
        ctx: &ExecutionContext,
    ) -> Result<String, EngineError> {
        let document = self.load_document(synthesis::GENERATOR_KEY).await?;

        let mut input = Map::new();
        input.insert("capability".to_string(), json!(capability));
        input.insert("module".to_string(), json!(module));
        input.insert("function".to_string(), json!(function));
        input.insert("reason".to_string(), json!(reason));

        let driven = self
            .execute_document(
                &document,
                synthesis::GENERATOR_OPERATION,
                input,
                Some(ctx.identity.client_id.clone()),
                Map::new(),
            )
            .await;

        match driven.outcome? {
            Value::String(text) if !text.trim().is_empty() => Ok(text),
            other => Err(EngineError::Generation {
                capability: capability.to_string(),
                reason: format!("generator returned {} instead of module text", kind_of(&other)),
            }),
        }
    }

    /// Every `module.function` call funnels through here.
    pub(crate) async fn invoke_capability(
        &self,
        module: &str,
        function: &str,
        args: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        resolver::invoke(self, module, function, args, ctx).await
    }

    /// `self.modify`: replace one operation's steps and record the
    /// result as a new head revision. The running document is untouched;
    /// the revision is picked up on the next load.
    pub(crate) async fn apply_modification(
        &self,
        document: &AgentDocument,
        operation: &str,
        steps_raw: &Value,
    ) -> Result<String, EngineError> {
        let steps = parse_steps(steps_raw, &format!("operations.{operation}"))?;

        let mut revised = document.clone();
        revised.operations.insert(operation.to_string(), steps);

        let text = serde_yaml::to_string(&revised.to_value())
            .map_err(|err| EngineError::Schema(err.to_string()))?;
        let snapshot = self.revisions.record(&revised.identity.id, &text)?;

        self.events.emit(
            EventKind::DocumentRevised,
            &revised.identity.id,
            json!({ "operation": operation, "revision": snapshot.hash }),
        );
        Ok(snapshot.hash)
    }

    /// `self.reflect`: ask the inference service to look at the document
    /// and the recent trace.
    pub(crate) async fn reflect(
        &self,
        document: &AgentDocument,
        ctx: &ExecutionContext,
        focus: Option<&str>,
    ) -> Result<String, EngineError> {
        let mut operations: Vec<&str> = document.operations.keys().map(String::as_str).collect();
        operations.sort_unstable();

        let start = ctx.trace.len().saturating_sub(8);
        let recent: Vec<Value> = ctx.trace[start..]
            .iter()
            .map(|entry| {
                json!({
                    "step": entry.step,
                    "success": entry.success,
                    "error": entry.error,
                })
            })
            .collect();

        let prompt = format!(
            "You are reviewing the agent document `{}`.\n\
             Intent: {}\n\
             Operations: {}\n\
             Recent steps:\n{}\n\
             {}Suggest concrete, specific improvements to this agent's operations.",
            document.identity.id,
            document.identity.intent.as_deref().unwrap_or("(none stated)"),
            operations.join(", "),
            serde_json::to_string_pretty(&Value::Array(recent)).unwrap_or_default(),
            focus
                .map(|f| format!("Focus on: {f}\n"))
                .unwrap_or_default(),
        );

        self.inference.complete(InferenceRequest::new(prompt)).await
    }

    pub(crate) fn services_for(&self, client_id: &str) -> ProviderServices {
        ProviderServices {
            inference: Arc::clone(&self.inference),
            channel: self.channel.clone(),
            http: self.http.clone(),
            client_id: client_id.to_string(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn directory(&self) -> &Arc<dyn CapabilityDirectory> {
        &self.directory
    }

    pub fn revisions(&self) -> &RevisionStore {
        &self.revisions
    }

    pub(crate) fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub(crate) fn synthesis_locks(&self) -> &SynthesisLocks {
        &self.synthesis
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "an empty string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::llm::StaticInference;

    async fn engine_in(dir: &tempfile::TempDir, replies: Vec<&str>) -> Interpreter {
        let config = EngineConfig {
            data_dir: dir.path().join("data"),
            agent_dirs: vec![dir.path().to_path_buf()],
            ..EngineConfig::default()
        };
        Interpreter::builder(config)
            .with_directory(Arc::new(MemoryDirectory::new()))
            .with_inference(Arc::new(StaticInference::new(
                replies.into_iter().map(String::from).collect(),
            )))
            .build()
            .await
            .unwrap()
    }

    fn write_agent(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn missing_document_folds_into_the_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir, vec![]).await;

        let outcome = engine
            .run(RunRequest::new(dir.path().join("nope.yaml").display().to_string()))
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not found"));
        assert!(outcome.trace.is_empty());
    }

    #[tokio::test]
    async fn missing_operation_still_returns_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir, vec![]).await;
        let file = write_agent(
            &dir,
            "one-op.yaml",
            "self:\n  id: one-op\noperations:\n  only:\n    - return: hi\n",
        );

        let mut request = RunRequest::new(file);
        request.operation = Some("other".to_string());
        let outcome = engine.run(request).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("other"));
        assert_eq!(outcome.context.agent_id, "one-op");
    }

    #[tokio::test]
    async fn default_operation_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir, vec![]).await;
        let file = write_agent(
            &dir,
            "defaulting.yaml",
            "self:\n  id: defaulting\noperations:\n  default:\n    - return: ran default\n",
        );

        let outcome = engine.run(RunRequest::new(file)).await;

        assert!(outcome.success);
        assert_eq!(outcome.result.unwrap(), json!("ran default"));
    }

    #[tokio::test]
    async fn bare_names_search_the_agent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir, vec![]).await;
        write_agent(
            &dir,
            "greeter.yaml",
            "self:\n  id: greeter\noperations:\n  default:\n    - return: hello\n",
        );

        let outcome = engine.run(RunRequest::new("greeter")).await;

        assert!(outcome.success);
        assert_eq!(outcome.result.unwrap(), json!("hello"));
    }

    #[tokio::test]
    async fn concern_failures_never_break_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir, vec![]).await;
        let file = write_agent(
            &dir,
            "worried.yaml",
            r#"
self:
  id: worried
operations:
  default:
    - set_memory:
        alerts: 5
    - return: done
concern:
  if: ${memory.alerts} > 3
  action:
    - "nosuch.capability: boom"
"#,
        );

        let outcome = engine.run(RunRequest::new(file)).await;

        assert!(outcome.success);
        assert_eq!(outcome.result.unwrap(), json!("done"));
        // The concern's failed step still shows up in the trace.
        assert!(outcome.trace.iter().any(|entry| !entry.success));
    }

    #[tokio::test]
    async fn revision_overrides_the_source_on_next_load() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir, vec![]).await;
        let file = write_agent(
            &dir,
            "mutable.yaml",
            r#"
self:
  id: mutable
operations:
  default:
    - return: original
  rewrite:
    - self.modify:
        operation: default
        steps:
          - return: revised
"#,
        );

        let mut request = RunRequest::new(file.clone());
        request.operation = Some("rewrite".to_string());
        let first = engine.run(request).await;
        assert!(first.success);

        let second = engine.run(RunRequest::new(file)).await;
        assert!(second.success);
        assert_eq!(second.result.unwrap(), json!("revised"));
    }
}
