//! Step executor: walks an operation's step list and drives each step
//! through its dispatch arm.
//!
//! ```yaml
//! operations:
//!   triage:
//!     - condition:
//!         if: ${input.urgency} === "high"
//!         then:
//!           - respond: escalating now
//!         else:
//!           - set_memory:
//!               queued: true
//!     - loop:
//!         forEach: ${input.tickets}
//!         as: ticket
//!         do:
//!           - "log.info: handling ${ticket.id}"
//!     - return: ${memory.queued}
//! ```
//!
//! Every attempted step appends one trace entry; successful outputs are
//! merged into memory (objects flattened in, and the whole output keyed
//! by the step's display name). A failing step aborts the operation
//! unless it declares `on_error: continue`.

use async_recursion::async_recursion;
use serde_json::{json, Map, Value};

use crate::capability::split_capability;
use crate::context::{ExecutionContext, TraceEntry};
use crate::document::{parse_steps, AgentDocument, OnError, Step, StepKind};
use crate::error::EngineError;
use crate::events::EventKind;
use crate::expr;
use crate::interpreter::Interpreter;
use crate::template;

/// How a step sequence finished.
#[derive(Debug)]
pub(crate) enum StepFlow {
    /// Ran to the end; carries the last step's output.
    Done(Value),
    /// A `return` step fired; carries the operation output.
    Return(Value),
}

impl StepFlow {
    pub(crate) fn into_value(self) -> Value {
        match self {
            StepFlow::Done(value) | StepFlow::Return(value) => value,
        }
    }
}

/// Outcome of a single step.
enum Outcome {
    Value(Value),
    Return(Value),
}

/// Runs `steps` in order against `ctx`, recording a trace entry per
/// attempted step and folding outputs into memory.
#[async_recursion]
pub(crate) async fn execute_steps(
    engine: &Interpreter,
    document: &AgentDocument,
    ctx: &mut ExecutionContext,
    steps: &[Step],
) -> Result<StepFlow, EngineError> {
    let mut last = Value::Null;

    for step in steps {
        let step_name = step.display_name().to_string();

        match drive(engine, document, ctx, step).await {
            Ok((input, Outcome::Value(output))) => {
                ctx.add_trace(TraceEntry::success(&step_name, input, output.clone()));
                remember(ctx, &step_name, &output);
                last = output;
            }
            Ok((input, Outcome::Return(value))) => {
                ctx.add_trace(TraceEntry::success(&step_name, input, value.clone()));
                return Ok(StepFlow::Return(value));
            }
            Err(err) => {
                let reason = err.to_string();
                ctx.add_trace(TraceEntry::failure(&step_name, authored(step), &reason));
                engine.events().emit(
                    EventKind::StepFailed,
                    &ctx.identity.agent_id,
                    json!({ "step": step_name, "error": reason }),
                );
                if step.on_error == OnError::Continue {
                    tracing::warn!(
                        "[Executor] step {} failed, continuing: {}",
                        step_name,
                        reason
                    );
                    continue;
                }
                return Err(wrap(&step_name, err));
            }
        }
    }

    Ok(StepFlow::Done(last))
}

/// Dispatches one step. Returns the resolved trace input alongside the
/// outcome so the caller can record exactly what the step saw.
async fn drive(
    engine: &Interpreter,
    document: &AgentDocument,
    ctx: &mut ExecutionContext,
    step: &Step,
) -> Result<(Value, Outcome), EngineError> {
    match &step.kind {
        StepKind::Shorthand(text) => {
            let (name, args) = match text.split_once(':') {
                Some((head, tail)) => {
                    let resolved = template::resolve_string(tail.trim(), ctx);
                    (head.trim(), json!({ "value": resolved }))
                }
                None => (text.trim(), Value::Object(Map::new())),
            };
            let output = dispatch_call(engine, document, ctx, name, args.clone()).await?;
            Ok((args, Outcome::Value(output)))
        }
        StepKind::Directive { key, payload } => match key.as_str() {
            "condition" => run_condition(engine, document, ctx, payload).await,
            "loop" => run_loop(engine, document, ctx, payload).await,
            "run" => run_sub_workflow(engine, ctx, payload).await,
            "return" => {
                let value = template::resolve(payload, ctx);
                Ok((value.clone(), Outcome::Return(value)))
            }
            "set_memory" => run_set_memory(ctx, payload),
            "append_to_array" => run_append(ctx, payload),
            "respond" => {
                let args = template::resolve(payload, ctx);
                let output = engine
                    .invoke_capability("channel", "respond", args.clone(), ctx)
                    .await?;
                Ok((args, Outcome::Value(output)))
            }
            "prompt.user" => {
                let args = template::resolve(payload, ctx);
                let output = engine
                    .invoke_capability("channel", "prompt", args.clone(), ctx)
                    .await?;
                Ok((args, Outcome::Value(output)))
            }
            "self.modify" => run_modify(engine, document, payload).await,
            "self.reflect" => {
                let args = template::resolve(payload, ctx);
                let focus = match &args {
                    Value::String(text) => Some(text.as_str()),
                    Value::Object(map) => map.get("focus").and_then(Value::as_str),
                    _ => None,
                };
                let text = engine.reflect(document, ctx, focus).await?;
                Ok((args, Outcome::Value(json!({ "reflection": text }))))
            }
            other => {
                let args = template::resolve(payload, ctx);
                let output = dispatch_call(engine, document, ctx, other, args.clone()).await?;
                Ok((args, Outcome::Value(output)))
            }
        },
    }
}

/// Internal operation when the same document defines one, otherwise a
/// `module.function` capability call.
async fn dispatch_call(
    engine: &Interpreter,
    document: &AgentDocument,
    ctx: &mut ExecutionContext,
    name: &str,
    args: Value,
) -> Result<Value, EngineError> {
    if let Some(steps) = document.operations.get(name) {
        let input = into_input(args);
        let mut child = ctx.derive_for_call(name, input);
        let result = execute_steps(engine, document, &mut child, steps).await;
        ctx.absorb(child);
        return Ok(result?.into_value());
    }

    let (module, function) = split_capability(name);
    engine.invoke_capability(&module, &function, args, ctx).await
}

async fn run_condition(
    engine: &Interpreter,
    document: &AgentDocument,
    ctx: &mut ExecutionContext,
    payload: &Value,
) -> Result<(Value, Outcome), EngineError> {
    let map = payload
        .as_object()
        .ok_or_else(|| EngineError::step("condition", "payload must be a mapping"))?;

    if let Some(raw) = map.get("switch") {
        let discriminant = template::resolve(raw, ctx);
        let cases = map
            .get("cases")
            .and_then(Value::as_object)
            .ok_or_else(|| EngineError::step("condition", "switch form needs a cases mapping"))?;
        let names: Vec<String> = cases.keys().cloned().collect();
        let chosen = expr::evaluate_switch(&discriminant, &names)
            .map(str::to_string)
            .or_else(|| cases.contains_key("default").then(|| "default".to_string()));

        let input = json!({ "switch": discriminant, "case": chosen.as_deref() });
        return match chosen {
            Some(name) => {
                let branch = parse_steps(&cases[&name], &format!("cases.{name}"))?;
                branch_outcome(engine, document, ctx, &branch, input).await
            }
            None => Ok((input, Outcome::Value(Value::Null))),
        };
    }

    let expr_text = map
        .get("if")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::step("condition", "needs an `if` expression"))?;
    let verdict = expr::evaluate(expr_text, ctx);
    let branch_key = if verdict { "then" } else { "else" };
    let input = json!({ "if": expr_text, "result": verdict });

    match map.get(branch_key) {
        Some(raw) => {
            let branch = parse_steps(raw, branch_key)?;
            branch_outcome(engine, document, ctx, &branch, input).await
        }
        None => Ok((input, Outcome::Value(Value::Bool(verdict)))),
    }
}

/// Runs a taken branch on the parent context; a `return` inside the
/// branch returns from the whole operation.
async fn branch_outcome(
    engine: &Interpreter,
    document: &AgentDocument,
    ctx: &mut ExecutionContext,
    branch: &[Step],
    input: Value,
) -> Result<(Value, Outcome), EngineError> {
    match execute_steps(engine, document, ctx, branch).await? {
        StepFlow::Done(value) => Ok((input, Outcome::Value(value))),
        StepFlow::Return(value) => Ok((input, Outcome::Return(value))),
    }
}

async fn run_loop(
    engine: &Interpreter,
    document: &AgentDocument,
    ctx: &mut ExecutionContext,
    payload: &Value,
) -> Result<(Value, Outcome), EngineError> {
    let map = payload
        .as_object()
        .ok_or_else(|| EngineError::step("loop", "payload must be a mapping"))?;
    let body_raw = map
        .get("do")
        .ok_or_else(|| EngineError::step("loop", "needs a `do` body"))?;
    let body = parse_steps(body_raw, "do")?;

    if let Some(raw) = map.get("forEach") {
        let binding = map.get("as").and_then(Value::as_str).unwrap_or("item");
        let items = match template::resolve(raw, ctx) {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(EngineError::step(
                    "loop",
                    format!("forEach expects an array, got {}", type_name(&other)),
                ))
            }
        };
        let input = json!({ "forEach": items.len(), "as": binding });

        let mut collected = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let mut child = ctx.derive_for_iteration(binding, item, index);
            let result = execute_steps(engine, document, &mut child, &body).await;
            ctx.absorb(child);
            match result? {
                StepFlow::Done(value) => collected.push(value),
                StepFlow::Return(value) => return Ok((input, Outcome::Return(value))),
            }
        }
        return Ok((input, Outcome::Value(Value::Array(collected))));
    }

    if let Some(cond) = map.get("while").and_then(Value::as_str) {
        let input = json!({ "while": cond });
        let mut iterations: u64 = 0;
        while expr::evaluate(cond, ctx) {
            match execute_steps(engine, document, ctx, &body).await? {
                StepFlow::Done(_) => {}
                StepFlow::Return(value) => return Ok((input, Outcome::Return(value))),
            }
            iterations += 1;
            if iterations % 1000 == 0 {
                tracing::debug!(
                    "[Executor] while loop at {} iterations: {}",
                    iterations,
                    cond
                );
            }
        }
        return Ok((input, Outcome::Value(json!(iterations))));
    }

    Err(EngineError::step("loop", "needs `forEach` or `while`"))
}

async fn run_sub_workflow(
    engine: &Interpreter,
    ctx: &mut ExecutionContext,
    payload: &Value,
) -> Result<(Value, Outcome), EngineError> {
    let resolved = template::resolve(payload, ctx);

    let (reference, operation, input) = match &resolved {
        Value::String(text) => (text.clone(), None, Map::new()),
        Value::Object(map) => {
            let reference = ["agent", "file", "path"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .ok_or_else(|| EngineError::step("run", "needs an agent reference"))?
                .to_string();
            let operation = map
                .get("operation")
                .and_then(Value::as_str)
                .map(str::to_string);
            let input = match map.get("input") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(fields)) => fields.clone(),
                Some(other) => {
                    let mut wrapped = Map::new();
                    wrapped.insert("value".to_string(), other.clone());
                    wrapped
                }
            };
            (reference, operation, input)
        }
        _ => {
            return Err(EngineError::step(
                "run",
                "payload must be a reference string or mapping",
            ))
        }
    };

    let trace_input = json!({ "agent": reference, "operation": operation });
    let output = engine
        .run_for_step(&reference, operation.as_deref(), input, ctx)
        .await?;
    Ok((trace_input, Outcome::Value(output)))
}

fn run_set_memory(
    ctx: &mut ExecutionContext,
    payload: &Value,
) -> Result<(Value, Outcome), EngineError> {
    let map = payload
        .as_object()
        .ok_or_else(|| EngineError::step("set_memory", "payload must be a mapping"))?;

    let mut written = Map::new();
    for (key, raw) in map {
        let value = template::resolve(raw, ctx);
        ctx.set_value(key.clone(), value.clone());
        written.insert(key.clone(), value);
    }
    let output = Value::Object(written);
    Ok((output.clone(), Outcome::Value(output)))
}

fn run_append(
    ctx: &mut ExecutionContext,
    payload: &Value,
) -> Result<(Value, Outcome), EngineError> {
    let map = payload
        .as_object()
        .ok_or_else(|| EngineError::step("append_to_array", "payload must be a mapping"))?;
    let target = ["array", "key", "name"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .ok_or_else(|| EngineError::step("append_to_array", "needs an `array` name"))?
        .to_string();
    let raw_item = map
        .get("item")
        .or_else(|| map.get("value"))
        .ok_or_else(|| EngineError::step("append_to_array", "needs an `item`"))?;
    let item = template::resolve(raw_item, ctx);

    let mut entries = match ctx.get_value(&target) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(existing)) => existing,
        Some(other) => {
            return Err(EngineError::step(
                "append_to_array",
                format!("`{}` holds {}, not an array", target, type_name(&other)),
            ))
        }
    };
    entries.push(item.clone());
    let updated = Value::Array(entries);
    ctx.set_value(target.clone(), updated.clone());

    Ok((
        json!({ "array": target, "item": item }),
        Outcome::Value(updated),
    ))
}

/// `self.modify` takes its payload verbatim: the new steps are data to
/// store, not templates to resolve.
async fn run_modify(
    engine: &Interpreter,
    document: &AgentDocument,
    payload: &Value,
) -> Result<(Value, Outcome), EngineError> {
    let map = payload
        .as_object()
        .ok_or_else(|| EngineError::step("self.modify", "payload must be a mapping"))?;
    let operation = map
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::step("self.modify", "needs an `operation` name"))?;
    let steps_raw = map
        .get("steps")
        .ok_or_else(|| EngineError::step("self.modify", "needs a `steps` list"))?;

    let revision = engine
        .apply_modification(document, operation, steps_raw)
        .await?;
    Ok((
        json!({ "operation": operation }),
        Outcome::Value(json!({ "revision": revision, "operation": operation })),
    ))
}

/// Folds a successful output into memory: object fields flatten in, and
/// the whole output also lands under the step's name.
fn remember(ctx: &mut ExecutionContext, step_name: &str, output: &Value) {
    if let Value::Object(fields) = output {
        for (key, value) in fields {
            ctx.set_value(key.clone(), value.clone());
        }
    }
    if !output.is_null() {
        ctx.set_value(step_name.to_string(), output.clone());
    }
}

/// Trace input for a step that failed before resolving: the authored
/// form, so the entry still shows what was attempted.
fn authored(step: &Step) -> Value {
    match &step.kind {
        StepKind::Shorthand(text) => Value::String(text.clone()),
        StepKind::Directive { payload, .. } => payload.clone(),
    }
}

fn wrap(step_name: &str, err: EngineError) -> EngineError {
    match err {
        wrapped @ EngineError::Step { .. } => wrapped,
        other => EngineError::step(step_name, other.to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn into_input(args: Value) -> Map<String, Value> {
    match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
