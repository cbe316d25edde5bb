//! Module synthesis.
//!
//! When a call names a module nothing answers for, the engine writes the
//! module itself: a generator document (itself an ordinary agent
//! document, registered under a virtual path) prompts the inference
//! service for a YAML module, and the reply is materialized in two
//! phases. Phase one validates: strip code fences, parse as a document,
//! require an operation named after the missing function. Phase two
//! commits: write the module file, register it in the registry and the
//! capability directory. A reply that fails phase one leaves no trace on
//! disk or in the registry.
//!
//! Synthesis for one capability is serialized by a per-capability lock;
//! concurrent callers wait, then find the module registered and skip
//! their own generation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::document::AgentDocument;
use crate::error::EngineError;

/// Virtual path the generator document is registered under.
pub const GENERATOR_KEY: &str = "orchid://system/module-generator";

/// The operation invoked on the generator document.
pub const GENERATOR_OPERATION: &str = "generate";

const GENERATOR_YAML: &str = r#"
self:
  id: module-generator
  intent: Generates capability modules for calls nothing answers for
  version: "1.0"

operations:
  generate:
    - name: generated
      llm.complete:
        maxTokens: 2000
        system: |
          You write modules for a YAML workflow engine. A module is an
          agent document: a `self` block naming the module, and an
          `operations` mapping where each operation name maps to a list
          of steps. A step is either a `module.function` call with an
          argument mapping, or one of the control keywords `condition`,
          `loop`, `return`, `set_memory`. Arguments may reference the
          caller's arguments with the dollar-brace template syntax over
          `input` fields.
          Builtin modules available to your steps: log.info, log.warn,
          log.error, http.get, http.post, llm.complete, llm.classify,
          util.uuid, util.timestamp.
          Reply with the YAML document only. No prose, no code fences.
        prompt: |
          A workflow called the capability `${input.capability}` but no
          module named `${input.module}` exists. Write that module now.

          Requirements:
          - `self.id` must be `${input.module}`
          - `operations` must define `${input.function}` as a list of steps
          - the last step of `${input.function}` must be a `return` whose
            value is the operation's result
          - reason the caller gave: ${input.reason}
    - return: ${generated.text}
"#;

/// Parses the built-in generator document. Infallible in practice; the
/// error path exists so a build with a broken generator fails loudly at
/// engine construction instead of at first synthesis.
pub fn generator_document() -> Result<AgentDocument, EngineError> {
    AgentDocument::from_str(GENERATOR_YAML)
}

/// Serializes synthesis per capability name.
#[derive(Default)]
pub struct SynthesisLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SynthesisLocks {
    pub fn new() -> Self {
        SynthesisLocks::default()
    }

    pub async fn lock_for(&self, capability: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(capability.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Phase one plus the file write of phase two: validate the generated
/// text and put the module on disk. Registry and directory registration
/// stay with the caller so a failed write commits nothing.
pub fn materialize(
    raw: &str,
    module: &str,
    function: &str,
    modules_dir: &Path,
) -> Result<(PathBuf, AgentDocument), EngineError> {
    let capability = format!("{module}.{function}");
    let cleaned = strip_fences(raw);
    if cleaned.is_empty() {
        return Err(EngineError::Generation {
            capability,
            reason: "generator produced empty output".to_string(),
        });
    }

    let document = AgentDocument::from_str(&cleaned).map_err(|err| EngineError::Generation {
        capability: capability.clone(),
        reason: format!("generated module does not parse: {err}"),
    })?;
    if !document.has_operation(function) {
        return Err(EngineError::Generation {
            capability,
            reason: format!("generated module lacks operation `{function}`"),
        });
    }

    std::fs::create_dir_all(modules_dir)?;
    let path = modules_dir.join(format!("{module}.yaml"));
    std::fs::write(&path, cleaned.as_bytes())?;
    tracing::info!(
        "[Synthesis] materialized module {} at {}",
        module,
        path.display()
    );
    Ok((path, document))
}

/// Model replies wrap YAML in code fences more often than not.
fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    match inner.split_once('\n') {
        Some((tag, body)) if matches!(tag.trim(), "" | "yaml" | "yml" | "json") => {
            body.trim().to_string()
        }
        _ => inner.trim().to_string(),
    }
}
