//! Engine error taxonomy.
//!
//! Every failure the engine can produce folds into [`EngineError`]. The
//! public entry point never lets these cross the API boundary raw: the
//! interpreter catches them and returns a structured outcome instead.
//! Inside the engine they propagate with `?` like any other `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A document (or one of its fallback paths) does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The file exists but neither YAML nor JSON could parse it.
    #[error("document parse failed: {0}")]
    Parse(String),

    /// The document parsed but violates the structural rules.
    #[error("document schema violation: {0}")]
    Schema(String),

    /// The requested operation is not defined in the document.
    #[error("operation `{operation}` not found in agent `{agent}`")]
    OperationNotFound { agent: String, operation: String },

    /// No registry entry, directory record, or module file answers for a
    /// capability. This is the only class that may trigger synthesis.
    #[error("capability `{0}` could not be resolved")]
    CapabilityNotFound(String),

    /// A step failed while executing.
    #[error("step `{step}` failed: {reason}")]
    Step { step: String, reason: String },

    /// Module synthesis produced no usable artifact.
    #[error("module generation failed for `{capability}`: {reason}")]
    Generation { capability: String, reason: String },

    /// The capability stayed unresolved after its single synthesis retry.
    #[error("capability `{0}` still unresolved after synthesis retry")]
    RetryExhausted(String),

    /// Capability directory lookup or write failed.
    #[error("capability directory error: {0}")]
    Directory(String),

    /// Inference service call failed.
    #[error("inference call failed: {0}")]
    Inference(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error belongs to the "not found" class that is allowed
    /// to trigger capability synthesis. Any other class must propagate
    /// without regeneration.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::CapabilityNotFound(_))
    }

    pub fn step(step: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        EngineError::Step {
            step: step.into(),
            reason: reason.to_string(),
        }
    }
}
