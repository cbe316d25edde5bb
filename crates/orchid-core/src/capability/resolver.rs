//! Capability resolution with synthesis fallback.
//!
//! [`invoke`] is the single entry for every `module.function` call. It
//! tries the registry, then the capability directory, then the
//! conventional `<modules_dir>/<module>.yaml` path, and only when the
//! module is genuinely unknown does it synthesize: generate the module,
//! register it, and retry the call exactly once. A second miss after
//! synthesis is [`EngineError::RetryExhausted`]; any failure that is not
//! the narrow not-found class propagates untouched and never triggers
//! regeneration.

use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;

use super::synthesis;
use super::{split_capability, Capability, ModuleRef};
use crate::context::ExecutionContext;
use crate::directory::CapabilityRecord;
use crate::error::EngineError;
use crate::events::EventKind;
use crate::interpreter::Interpreter;

pub(crate) async fn invoke(
    engine: &Interpreter,
    module: &str,
    function: &str,
    args: Value,
    ctx: &ExecutionContext,
) -> Result<Value, EngineError> {
    match attempt(engine, module, function, &args, ctx).await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_not_found() => {
            tracing::info!("[Resolver] {}, synthesizing", err);
        }
        Err(err) => return Err(err),
    }

    let capability = format!("{module}.{function}");
    let lock = engine.synthesis_locks().lock_for(&capability).await;
    let _guard = lock.lock().await;

    // Someone may have materialized the module while we waited.
    if engine.registry().lookup(module).await.is_none() {
        synthesize(engine, module, function, &capability, ctx).await?;
    }

    match attempt(engine, module, function, &args, ctx).await {
        Err(err) if err.is_not_found() => Err(EngineError::RetryExhausted(capability)),
        other => other,
    }
}

/// One resolution pass, no synthesis: registry, directory record, then
/// the conventional module path. Directory failures log and fall
/// through; the directory is advisory, never load-bearing.
async fn attempt(
    engine: &Interpreter,
    module: &str,
    function: &str,
    args: &Value,
    ctx: &ExecutionContext,
) -> Result<Value, EngineError> {
    match engine.registry().lookup(module).await {
        Some(Capability::Builtin(provider)) => {
            let services = engine.services_for(&ctx.identity.client_id);
            return provider.invoke(function, args.clone(), &services).await;
        }
        Some(Capability::Module(reference)) => {
            let result = engine
                .run_module(&reference, function, args.clone(), ctx)
                .await?;
            let _ = engine
                .directory()
                .touch(&format!("{module}.{function}"))
                .await;
            return Ok(mark_generated(result, &reference));
        }
        None => {}
    }

    let capability = format!("{module}.{function}");

    match engine.directory().resolve(&capability).await {
        Ok(Some(record)) => {
            let path = PathBuf::from(&record.provider);
            if path.exists() {
                let reference = ModuleRef {
                    module: module.to_string(),
                    path,
                    auto_generated: record.auto_generated,
                };
                return run_registered(engine, reference, function, args, ctx, &capability).await;
            }

            // A provider that is not a file may alias another registered
            // capability; follow it one level, never deeper.
            let (alias_module, alias_function) = split_capability(&record.provider);
            match engine.registry().lookup(&alias_module).await {
                Some(Capability::Builtin(provider)) => {
                    let services = engine.services_for(&ctx.identity.client_id);
                    let result = provider
                        .invoke(&alias_function, args.clone(), &services)
                        .await?;
                    let _ = engine.directory().touch(&capability).await;
                    return Ok(result);
                }
                Some(Capability::Module(reference)) => {
                    let result = engine
                        .run_module(&reference, &alias_function, args.clone(), ctx)
                        .await?;
                    let _ = engine.directory().touch(&capability).await;
                    return Ok(mark_generated(result, &reference));
                }
                None => tracing::warn!(
                    "[Resolver] directory points {} at unusable provider {}",
                    capability,
                    record.provider
                ),
            }
        }
        Ok(None) => {}
        Err(err) => tracing::warn!(
            "[Resolver] directory lookup for {} failed: {}",
            capability,
            err
        ),
    }

    let conventional = engine
        .config()
        .modules_path()
        .join(format!("{module}.yaml"));
    if conventional.exists() {
        let reference = ModuleRef {
            module: module.to_string(),
            path: conventional,
            auto_generated: false,
        };
        return run_registered(engine, reference, function, args, ctx, &capability).await;
    }

    Err(EngineError::CapabilityNotFound(capability))
}

/// First call to a module the registry has not seen yet: record it,
/// run the function, note the use in the directory.
async fn run_registered(
    engine: &Interpreter,
    reference: ModuleRef,
    function: &str,
    args: &Value,
    ctx: &ExecutionContext,
    capability: &str,
) -> Result<Value, EngineError> {
    engine.registry().register_module(reference.clone()).await?;
    let result = engine
        .run_module(&reference, function, args.clone(), ctx)
        .await?;
    let _ = engine.directory().touch(capability).await;
    Ok(mark_generated(result, &reference))
}

async fn synthesize(
    engine: &Interpreter,
    module: &str,
    function: &str,
    capability: &str,
    ctx: &ExecutionContext,
) -> Result<(), EngineError> {
    engine.events().emit(
        EventKind::SynthesisStarted,
        &ctx.identity.agent_id,
        json!({ "capability": capability }),
    );

    let reason = format!(
        "agent `{}` invoked `{capability}` during operation `{}`",
        ctx.identity.agent_id, ctx.identity.operation
    );
    let raw = match engine
        .run_generator(capability, module, function, &reason, ctx)
        .await
    {
        Ok(raw) => raw,
        Err(err) => {
            emit_failure(engine, ctx, capability, &err);
            return Err(match err {
                generation @ EngineError::Generation { .. } => generation,
                other => EngineError::Generation {
                    capability: capability.to_string(),
                    reason: other.to_string(),
                },
            });
        }
    };

    let modules_dir = engine.config().modules_path();
    let (path, _document) = match synthesis::materialize(&raw, module, function, &modules_dir) {
        Ok(materialized) => materialized,
        Err(err) => {
            emit_failure(engine, ctx, capability, &err);
            return Err(err);
        }
    };

    let reference = ModuleRef {
        module: module.to_string(),
        path: path.clone(),
        auto_generated: true,
    };
    if let Err(err) = engine.registry().register_module(reference).await {
        emit_failure(engine, ctx, capability, &err);
        return Err(err);
    }
    if let Err(err) = engine
        .directory()
        .register(CapabilityRecord::generated(
            capability,
            path.display().to_string(),
        ))
        .await
    {
        tracing::warn!(
            "[Resolver] directory record for {} failed: {}",
            capability,
            err
        );
    }

    engine.events().emit(
        EventKind::SynthesisSucceeded,
        &ctx.identity.agent_id,
        json!({ "capability": capability, "path": path.display().to_string() }),
    );
    Ok(())
}

fn emit_failure(engine: &Interpreter, ctx: &ExecutionContext, capability: &str, err: &EngineError) {
    engine.events().emit(
        EventKind::SynthesisFailed,
        &ctx.identity.agent_id,
        json!({ "capability": capability, "error": err.to_string() }),
    );
}

/// Results of auto-generated modules carry provenance markers, object
/// results only.
fn mark_generated(result: Value, reference: &ModuleRef) -> Value {
    if !reference.auto_generated {
        return result;
    }
    match result {
        Value::Object(mut map) => {
            map.insert("_auto_generated".to_string(), Value::Bool(true));
            map.insert(
                "_generated_at".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            Value::Object(map)
        }
        other => other,
    }
}
