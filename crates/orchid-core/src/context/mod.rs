//! Execution context and trace.
//!
//! Every run owns one [`ExecutionContext`]: identity (who is running,
//! for whom, which operation), `memory` (the scratch space steps write
//! to), `input` (caller arguments plus identity), `metadata`, and the
//! append-only `trace`. Memory is the canonical store and all writes go
//! through [`ExecutionContext::set_value`], while reads fall through a
//! fixed chain of views so documents written against older context
//! shapes (identity in `input`, a nested `context` map) keep resolving.
//!
//! Nested work never aliases the parent context: internal operation
//! calls derive a context with [`derive_for_call`], loop bodies with
//! [`derive_for_iteration`], and the parent takes their memory writes
//! and trace entries back with [`absorb`].
//!
//! [`derive_for_call`]: ExecutionContext::derive_for_call
//! [`derive_for_iteration`]: ExecutionContext::derive_for_iteration
//! [`absorb`]: ExecutionContext::absorb

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const UNKNOWN_AGENT: &str = "unknown";
const SYSTEM_CLIENT: &str = "system";
const DEFAULT_OPERATION: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextIdentity {
    pub agent_id: String,
    pub client_id: String,
    pub operation: String,
    pub timestamp: String,
}

/// One executed step, in strict execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub step: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    pub timestamp: String,
}

impl TraceEntry {
    pub fn success(step: impl Into<String>, input: Value, output: Value) -> Self {
        TraceEntry {
            step: step.into(),
            input,
            output: Some(output),
            error: None,
            success: true,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn failure(step: impl Into<String>, input: Value, error: impl Into<String>) -> Self {
        TraceEntry {
            step: step.into(),
            input,
            output: None,
            error: Some(error.into()),
            success: false,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub agent_id: Option<String>,
    pub client_id: Option<String>,
    pub operation: Option<String>,
    pub input: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

/// Final-state summary returned in the public outcome envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub agent_id: String,
    pub client_id: String,
    pub operation: String,
    pub memory: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub identity: ContextIdentity,
    pub memory: Map<String, Value>,
    pub input: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub trace: Vec<TraceEntry>,
}

impl ExecutionContext {
    pub fn create(options: ContextOptions) -> Self {
        let ContextOptions {
            agent_id,
            client_id,
            operation,
            mut input,
            metadata,
        } = options;

        let agent_id = resolve_field(agent_id, &input, &metadata, "agent_id", "agentId")
            .unwrap_or_else(|| UNKNOWN_AGENT.to_string());
        let client_id = resolve_field(client_id, &input, &metadata, "client_id", "clientId")
            .unwrap_or_else(|| SYSTEM_CLIENT.to_string());
        let operation = resolve_field(operation, &input, &metadata, "operation", "operation")
            .unwrap_or_else(|| DEFAULT_OPERATION.to_string());
        let timestamp = chrono::Utc::now().to_rfc3339();

        // Identity rides along in input so documents can reference it.
        input
            .entry("agent_id".to_string())
            .or_insert_with(|| Value::String(agent_id.clone()));
        input
            .entry("client_id".to_string())
            .or_insert_with(|| Value::String(client_id.clone()));
        input
            .entry("operation".to_string())
            .or_insert_with(|| Value::String(operation.clone()));
        input
            .entry("timestamp".to_string())
            .or_insert_with(|| Value::String(timestamp.clone()));

        ExecutionContext {
            identity: ContextIdentity {
                agent_id,
                client_id,
                operation,
                timestamp,
            },
            memory: Map::new(),
            input,
            metadata,
            trace: Vec::new(),
        }
    }

    /// Template-resolution lookup: literal dotted key first (memory then
    /// input), then segment traversal through memory, input, and finally
    /// the context root (`memory.*`, `input.*`, `metadata.*`, identity).
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if let Some(value) = lookup_in(&self.memory, path) {
            return Some(value.clone());
        }
        if let Some(value) = lookup_in(&self.input, path) {
            return Some(value.clone());
        }

        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match head {
            "memory" => match rest {
                Some(rest) => lookup_in(&self.memory, rest).cloned(),
                None => Some(Value::Object(self.memory.clone())),
            },
            "input" => match rest {
                Some(rest) => lookup_in(&self.input, rest).cloned(),
                None => Some(Value::Object(self.input.clone())),
            },
            "metadata" => match rest {
                Some(rest) => lookup_in(&self.metadata, rest).cloned(),
                None => Some(Value::Object(self.metadata.clone())),
            },
            "agent_id" if rest.is_none() => Some(Value::String(self.identity.agent_id.clone())),
            "client_id" if rest.is_none() => Some(Value::String(self.identity.client_id.clone())),
            "operation" if rest.is_none() => Some(Value::String(self.identity.operation.clone())),
            "timestamp" if rest.is_none() => Some(Value::String(self.identity.timestamp.clone())),
            _ => None,
        }
    }

    /// Accessor-chain read: identity → input → memory → metadata → legacy
    /// nested `context` maps. The write side is [`set_value`] alone.
    ///
    /// [`set_value`]: ExecutionContext::set_value
    pub fn get_value(&self, path: &str) -> Option<Value> {
        match path {
            "agent_id" | "agentId" => return Some(Value::String(self.identity.agent_id.clone())),
            "client_id" | "clientId" => {
                return Some(Value::String(self.identity.client_id.clone()))
            }
            "operation" => return Some(Value::String(self.identity.operation.clone())),
            "timestamp" => return Some(Value::String(self.identity.timestamp.clone())),
            _ => {}
        }
        if let Some(value) = lookup_in(&self.input, path) {
            return Some(value.clone());
        }
        if let Some(value) = lookup_in(&self.memory, path) {
            return Some(value.clone());
        }
        if let Some(value) = lookup_in(&self.metadata, path) {
            return Some(value.clone());
        }
        for store in [&self.input, &self.metadata] {
            if let Some(Value::Object(nested)) = store.get("context") {
                if let Some(value) = lookup_in(nested, path) {
                    return Some(value.clone());
                }
            }
        }
        None
    }

    /// The single write path. Everything observable through the read
    /// views goes through memory.
    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.memory.insert(key.into(), value);
    }

    pub fn update_memory(&mut self, updates: Map<String, Value>) {
        for (key, value) in updates {
            self.memory.insert(key, value);
        }
    }

    /// Merges a context-shaped patch: `memory`/`input`/`metadata`
    /// sections land in their stores, loose keys land in memory.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            match (key.as_str(), value) {
                ("memory", Value::Object(section)) => {
                    for (k, v) in section {
                        self.memory.insert(k.clone(), v.clone());
                    }
                }
                ("input", Value::Object(section)) => {
                    for (k, v) in section {
                        self.input.insert(k.clone(), v.clone());
                    }
                }
                ("metadata", Value::Object(section)) => {
                    for (k, v) in section {
                        self.metadata.insert(k.clone(), v.clone());
                    }
                }
                _ => {
                    self.memory.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn add_trace(&mut self, entry: TraceEntry) {
        self.trace.push(entry);
    }

    /// Shape check that never panics; problems are logged and the
    /// context stays usable.
    pub fn validate(&self) -> bool {
        let mut ok = true;
        if self.identity.agent_id.is_empty() {
            tracing::warn!("[Context] empty agent_id");
            ok = false;
        }
        if self.identity.operation.is_empty() {
            tracing::warn!("[Context] empty operation");
            ok = false;
        }
        ok
    }

    /// Context for a nested same-document operation call: memory seeded
    /// from the parent, fresh trace, inherited identity.
    pub fn derive_for_call(&self, operation: &str, input: Map<String, Value>) -> Self {
        let options = ContextOptions {
            agent_id: Some(self.identity.agent_id.clone()),
            client_id: Some(self.identity.client_id.clone()),
            operation: Some(operation.to_string()),
            input,
            metadata: self.metadata.clone(),
        };
        let mut child = ExecutionContext::create(options);
        child.memory = self.memory.clone();
        child
    }

    /// Context for one loop iteration: a clone with the current element
    /// bound under `binding` and its position under `<binding>_index`.
    pub fn derive_for_iteration(&self, binding: &str, item: Value, index: usize) -> Self {
        let mut child = self.clone();
        child.trace = Vec::new();
        child.memory.insert(binding.to_string(), item);
        child
            .memory
            .insert(format!("{binding}_index"), Value::from(index));
        child
    }

    /// Folds a derived context back in: memory writes win over the
    /// parent's, trace entries append in order.
    pub fn absorb(&mut self, child: ExecutionContext) {
        for (key, value) in child.memory {
            self.memory.insert(key, value);
        }
        self.trace.extend(child.trace);
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            agent_id: self.identity.agent_id.clone(),
            client_id: self.identity.client_id.clone(),
            operation: self.identity.operation.clone(),
            memory: self.memory.clone(),
        }
    }
}

/// Identity field resolution: direct option → `input.*` → nested
/// `input.context.*` → `metadata.*` → nested `metadata.context.*`.
fn resolve_field(
    direct: Option<String>,
    input: &Map<String, Value>,
    metadata: &Map<String, Value>,
    snake: &str,
    camel: &str,
) -> Option<String> {
    if let Some(value) = direct {
        return Some(value);
    }
    for store in [input, metadata] {
        if let Some(value) = get_str_either(store, snake, camel) {
            return Some(value);
        }
        if let Some(Value::Object(nested)) = store.get("context") {
            if let Some(value) = get_str_either(nested, snake, camel) {
                return Some(value);
            }
        }
    }
    None
}

fn get_str_either(map: &Map<String, Value>, snake: &str, camel: &str) -> Option<String> {
    map.get(snake)
        .or_else(|| map.get(camel))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Literal-key-first lookup inside one store, then dotted traversal
/// (objects by key, arrays by numeric index).
pub(crate) fn lookup_in<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(inner) => inner.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn direct_identity_beats_input_and_metadata() {
        let ctx = ExecutionContext::create(ContextOptions {
            agent_id: Some("direct".into()),
            input: obj(json!({ "agent_id": "from-input" })),
            metadata: obj(json!({ "agent_id": "from-metadata" })),
            ..ContextOptions::default()
        });
        assert_eq!(ctx.identity.agent_id, "direct");
    }

    #[test]
    fn identity_falls_back_through_the_chain() {
        let ctx = ExecutionContext::create(ContextOptions {
            input: obj(json!({ "context": { "clientId": "legacy-client" } })),
            metadata: obj(json!({ "agent_id": "meta-agent" })),
            ..ContextOptions::default()
        });
        assert_eq!(ctx.identity.agent_id, "meta-agent");
        assert_eq!(ctx.identity.client_id, "legacy-client");
        assert_eq!(ctx.identity.operation, "default");
    }

    #[test]
    fn sentinels_apply_when_nothing_resolves() {
        let ctx = ExecutionContext::create(ContextOptions::default());
        assert_eq!(ctx.identity.agent_id, "unknown");
        assert_eq!(ctx.identity.client_id, "system");
        assert_eq!(ctx.identity.operation, "default");
    }

    #[test]
    fn identity_is_folded_into_input() {
        let ctx = ExecutionContext::create(ContextOptions {
            agent_id: Some("researcher".into()),
            ..ContextOptions::default()
        });
        assert_eq!(ctx.input["agent_id"], json!("researcher"));
        assert_eq!(ctx.lookup("input.agent_id"), Some(json!("researcher")));
    }

    #[test]
    fn set_value_is_visible_through_every_read_pattern() {
        let mut ctx = ExecutionContext::create(ContextOptions::default());
        ctx.set_value("count", json!(3));
        assert_eq!(ctx.lookup("count"), Some(json!(3)));
        assert_eq!(ctx.lookup("memory.count"), Some(json!(3)));
        assert_eq!(ctx.get_value("count"), Some(json!(3)));
    }

    #[test]
    fn literal_dotted_keys_win_over_traversal() {
        let mut ctx = ExecutionContext::create(ContextOptions::default());
        ctx.set_value("llm.complete", json!({ "text": "literal" }));
        ctx.set_value("llm", json!({ "complete": "traversed" }));
        assert_eq!(
            ctx.lookup("llm.complete"),
            Some(json!({ "text": "literal" }))
        );
    }

    #[test]
    fn lookup_traverses_objects_and_arrays() {
        let mut ctx = ExecutionContext::create(ContextOptions::default());
        ctx.set_value("report", json!({ "sections": ["intro", "body"] }));
        assert_eq!(ctx.lookup("report.sections.1"), Some(json!("body")));
        assert_eq!(ctx.lookup("report.sections.9"), None);
    }

    #[test]
    fn get_value_reads_legacy_nested_context() {
        let ctx = ExecutionContext::create(ContextOptions {
            input: obj(json!({ "context": { "session": "abc123" } })),
            ..ContextOptions::default()
        });
        assert_eq!(ctx.get_value("session"), Some(json!("abc123")));
    }

    #[test]
    fn derive_for_call_seeds_memory_and_resets_trace() {
        let mut parent = ExecutionContext::create(ContextOptions {
            agent_id: Some("parent".into()),
            ..ContextOptions::default()
        });
        parent.set_value("shared", json!(true));
        parent.add_trace(TraceEntry::success("seed", Value::Null, Value::Null));

        let child = parent.derive_for_call("helper", obj(json!({ "x": 5 })));
        assert_eq!(child.identity.agent_id, "parent");
        assert_eq!(child.identity.operation, "helper");
        assert_eq!(child.memory["shared"], json!(true));
        assert_eq!(child.input["x"], json!(5));
        assert!(child.trace.is_empty());
    }

    #[test]
    fn iteration_context_binds_item_and_index() {
        let parent = ExecutionContext::create(ContextOptions::default());
        let child = parent.derive_for_iteration("task", json!("first"), 0);
        assert_eq!(child.lookup("task"), Some(json!("first")));
        assert_eq!(child.lookup("task_index"), Some(json!(0)));
    }

    #[test]
    fn absorb_merges_memory_and_appends_trace() {
        let mut parent = ExecutionContext::create(ContextOptions::default());
        parent.set_value("kept", json!(1));

        let mut child = parent.derive_for_iteration("item", json!("a"), 0);
        child.set_value("produced", json!("result"));
        child.add_trace(TraceEntry::success("inner", Value::Null, json!("result")));

        parent.absorb(child);
        assert_eq!(parent.memory["kept"], json!(1));
        assert_eq!(parent.memory["produced"], json!("result"));
        assert_eq!(parent.trace.len(), 1);
    }

    #[test]
    fn merge_routes_sections_and_loose_keys() {
        let mut ctx = ExecutionContext::create(ContextOptions::default());
        ctx.merge(&obj(json!({
            "memory": { "a": 1 },
            "metadata": { "origin": "test" },
            "loose": "lands-in-memory"
        })));
        assert_eq!(ctx.memory["a"], json!(1));
        assert_eq!(ctx.metadata["origin"], json!("test"));
        assert_eq!(ctx.memory["loose"], json!("lands-in-memory"));
    }
}
