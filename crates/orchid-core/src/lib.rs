//! Orchid Core: the agent workflow engine.
//!
//! Agent documents are YAML/JSON workflow definitions. The interpreter
//! loads them, the executor walks their steps, and every
//! `module.function` call resolves through the capability registry. A
//! call nothing answers for is synthesized at runtime: a generator
//! workflow prompts the inference service for the missing module, the
//! engine validates and registers it, and the original call retries
//! exactly once.
//!
//! ```text
//! RunRequest -> Interpreter -> Executor -> Templates + Conditions
//!                  |              |
//!          DocumentLoader         +-> Capability Resolver
//!          RevisionStore                |-> builtin modules
//!          EventBus                     |-> document modules
//!                                       +-> Synthesizer (inference)
//! ```
//!
//! The public surface is [`Interpreter::run`]: it takes a [`RunRequest`]
//! and always returns a [`RunOutcome`], never an error.

pub mod capability;
pub mod channel;
pub mod config;
pub mod context;
pub mod directory;
pub mod document;
pub mod error;
pub mod events;
mod executor;
pub mod expr;
pub mod interpreter;
pub mod llm;
pub mod revision;
pub mod template;

// Convenience re-exports
pub use config::EngineConfig;
pub use error::EngineError;
pub use interpreter::{Interpreter, InterpreterBuilder, RunOutcome, RunRequest};
