//! Agent workflow documents.
//!
//! An agent is a declarative YAML (or JSON) document: a map of named
//! operations, each a sequence of steps. Steps are either a shorthand
//! string or a single-key mapping whose key is a control keyword or a
//! `module.function` name:
//!
//! ```yaml
//! self:
//!   id: support.triage
//!   intent: Route incoming tickets to the right queue
//!
//! operations:
//!   default:
//!     - set_memory:
//!         ticket: "${input.ticket}"
//!     - condition:
//!         if: "${memory.ticket.priority} === \"high\""
//!         then:
//!           - escalation.page: { ticket: "${memory.ticket}" }
//!         else:
//!           - queue.enqueue: { ticket: "${memory.ticket}" }
//!     - return: "${memory.ticket.id}"
//!
//! concern:
//!   if: "${memory.error_count} > 3"
//!   priority: 10
//!   action:
//!     - log.warn: { message: "triage degraded" }
//! ```
//!
//! Parsing is two-stage: the text becomes a `serde_json::Value` tree
//! (YAML first, JSON as fallback), then structural validation builds the
//! typed [`AgentDocument`]. Validation is structural only: expression
//! strings and referenced module names are never checked here, they fail
//! lazily at execution time.

mod loader;

pub use loader::DocumentLoader;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Step modifier keys that may ride alongside the single action key.
const MODIFIER_KEYS: [&str; 3] = ["name", "on_error", "onError"];

#[derive(Debug, Clone)]
pub struct AgentDocument {
    pub identity: Identity,
    pub operations: HashMap<String, Vec<Step>>,
    pub concern: Option<Concern>,
    /// Access policy block (`aam`), carried verbatim.
    pub access: Option<Value>,
    /// Ingress binding, carried verbatim.
    pub incoming: Option<Value>,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub id: String,
    pub intent: Option<String>,
    pub version: Option<String>,
}

/// Standing health rule: evaluated after every run, on the final context.
#[derive(Debug, Clone)]
pub struct Concern {
    pub condition: String,
    pub priority: Option<Value>,
    pub action: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    /// Overrides the memory/trace key for this step.
    pub name: Option<String>,
    pub on_error: OnError,
}

#[derive(Debug, Clone)]
pub enum StepKind {
    /// `"funcName: arg"` or `"funcName"`, a primitive call.
    Shorthand(String),
    /// Single-key mapping: keyword or `module.function` with a payload.
    Directive { key: String, payload: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    Abort,
    Continue,
}

impl AgentDocument {
    pub fn from_str(text: &str) -> Result<Self, EngineError> {
        parse_document(text, None)
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Rebuilds the document as a value tree, the inverse of parsing.
    /// Used when a revision snapshot has to be written back out.
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();

        let mut identity = Map::new();
        identity.insert("id".to_string(), Value::String(self.identity.id.clone()));
        if let Some(intent) = &self.identity.intent {
            identity.insert("intent".to_string(), Value::String(intent.clone()));
        }
        if let Some(version) = &self.identity.version {
            identity.insert("version".to_string(), Value::String(version.clone()));
        }
        root.insert("self".to_string(), Value::Object(identity));

        if let Some(access) = &self.access {
            root.insert("aam".to_string(), access.clone());
        }

        let mut operations = Map::new();
        for (name, steps) in &self.operations {
            let rendered: Vec<Value> = steps.iter().map(Step::to_value).collect();
            operations.insert(name.clone(), Value::Array(rendered));
        }
        root.insert("operations".to_string(), Value::Object(operations));

        if let Some(concern) = &self.concern {
            let mut block = Map::new();
            block.insert("if".to_string(), Value::String(concern.condition.clone()));
            if let Some(priority) = &concern.priority {
                block.insert("priority".to_string(), priority.clone());
            }
            let action: Vec<Value> = concern.action.iter().map(Step::to_value).collect();
            block.insert("action".to_string(), Value::Array(action));
            root.insert("concern".to_string(), Value::Object(block));
        }

        if let Some(incoming) = &self.incoming {
            root.insert("incoming".to_string(), incoming.clone());
        }

        Value::Object(root)
    }
}

impl Step {
    /// The key this step's output lands under in memory and trace,
    /// unless overridden by a `name` modifier.
    pub fn display_name(&self) -> &str {
        if let Some(name) = &self.name {
            return name;
        }
        match &self.kind {
            StepKind::Shorthand(text) => text
                .split_once(':')
                .map(|(head, _)| head.trim())
                .unwrap_or(text.trim()),
            StepKind::Directive { key, .. } => key,
        }
    }

    pub fn to_value(&self) -> Value {
        match &self.kind {
            StepKind::Shorthand(text) => {
                if self.name.is_none() && self.on_error == OnError::Abort {
                    return Value::String(text.clone());
                }
                // Modifiers force the mapping form.
                let mut map = Map::new();
                map.insert(text.clone(), Value::Null);
                self.render_modifiers(&mut map);
                Value::Object(map)
            }
            StepKind::Directive { key, payload } => {
                let mut map = Map::new();
                map.insert(key.clone(), payload.clone());
                self.render_modifiers(&mut map);
                Value::Object(map)
            }
        }
    }

    fn render_modifiers(&self, map: &mut Map<String, Value>) {
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        if self.on_error == OnError::Continue {
            map.insert("on_error".to_string(), Value::String("continue".to_string()));
        }
    }
}

/// Parses and validates a document from raw text. YAML is tried first,
/// JSON second; the YAML error is reported when both fail.
pub fn parse_document(text: &str, source: Option<&Path>) -> Result<AgentDocument, EngineError> {
    let root = parse_value(text)?;

    let root = match root {
        Value::Object(map) => map,
        _ => {
            return Err(EngineError::Schema(
                "document root must be a mapping".to_string(),
            ))
        }
    };

    let fallback_id = source
        .and_then(|path| path.file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or("anonymous");
    let identity = parse_identity(root.get("self"), fallback_id)?;

    let operations = match root.get("operations") {
        Some(Value::Object(ops)) => {
            let mut parsed = HashMap::with_capacity(ops.len());
            for (name, value) in ops {
                let steps = parse_steps(value, &format!("operations.{name}"))?;
                parsed.insert(name.clone(), steps);
            }
            parsed
        }
        Some(_) => {
            return Err(EngineError::Schema(
                "operations must be a mapping of operation names to step sequences".to_string(),
            ))
        }
        None => {
            return Err(EngineError::Schema(
                "document has no operations".to_string(),
            ))
        }
    };

    let concern = match root.get("concern") {
        Some(value) => Some(parse_concern(value)?),
        None => None,
    };

    Ok(AgentDocument {
        identity,
        operations,
        concern,
        access: root.get("aam").cloned(),
        incoming: root.get("incoming").cloned(),
        source: source.map(Path::to_path_buf),
    })
}

fn parse_value(text: &str) -> Result<Value, EngineError> {
    match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(yaml) => serde_json::to_value(yaml)
            .map_err(|err| EngineError::Parse(format!("unsupported document shape: {err}"))),
        Err(yaml_err) => match serde_json::from_str::<Value>(text) {
            Ok(json) => Ok(json),
            Err(_) => Err(EngineError::Parse(yaml_err.to_string())),
        },
    }
}

fn parse_identity(value: Option<&Value>, fallback_id: &str) -> Result<Identity, EngineError> {
    let map = match value {
        None | Some(Value::Null) => {
            return Ok(Identity {
                id: fallback_id.to_string(),
                ..Identity::default()
            })
        }
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(EngineError::Schema(
                "self must be a mapping".to_string(),
            ))
        }
    };

    let id = match map.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(_) => {
            return Err(EngineError::Schema(
                "self.id must be a string".to_string(),
            ))
        }
        None => fallback_id.to_string(),
    };

    Ok(Identity {
        id,
        intent: map.get("intent").and_then(Value::as_str).map(String::from),
        version: map.get("version").and_then(Value::as_str).map(String::from),
    })
}

fn parse_concern(value: &Value) -> Result<Concern, EngineError> {
    let map = value.as_object().ok_or_else(|| {
        EngineError::Schema("concern must be a mapping".to_string())
    })?;

    let condition = map
        .get("if")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Schema("concern.if must be a string".to_string()))?
        .to_string();

    let action = map
        .get("action")
        .ok_or_else(|| EngineError::Schema("concern.action is required".to_string()))?;
    let action = parse_steps(action, "concern.action")?;

    Ok(Concern {
        condition,
        priority: map.get("priority").cloned(),
        action,
    })
}

/// Parses a step sequence. Also used at execution time for the nested
/// step lists inside condition branches and loop bodies.
pub fn parse_steps(value: &Value, location: &str) -> Result<Vec<Step>, EngineError> {
    let items = value.as_array().ok_or_else(|| {
        EngineError::Schema(format!("{location} must be a sequence of steps"))
    })?;

    let mut steps = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let step = parse_step(item)
            .map_err(|err| match err {
                EngineError::Schema(reason) => {
                    EngineError::Schema(format!("{location}[{index}]: {reason}"))
                }
                other => other,
            })?;
        steps.push(step);
    }
    Ok(steps)
}

fn parse_step(value: &Value) -> Result<Step, EngineError> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(EngineError::Schema("step string is empty".to_string()));
            }
            Ok(Step {
                kind: StepKind::Shorthand(trimmed.to_string()),
                name: None,
                on_error: OnError::Abort,
            })
        }
        Value::Object(map) => {
            let name = match map.get("name") {
                Some(Value::String(name)) => Some(name.clone()),
                Some(_) => {
                    return Err(EngineError::Schema("step name must be a string".to_string()))
                }
                None => None,
            };

            let on_error = match map.get("on_error").or_else(|| map.get("onError")) {
                Some(Value::String(mode)) if mode == "continue" => OnError::Continue,
                Some(Value::String(_)) => OnError::Abort,
                Some(_) => {
                    return Err(EngineError::Schema(
                        "step on_error must be a string".to_string(),
                    ))
                }
                None => OnError::Abort,
            };

            let actions: Vec<(&String, &Value)> = map
                .iter()
                .filter(|(key, _)| !MODIFIER_KEYS.contains(&key.as_str()))
                .collect();

            match actions.as_slice() {
                [(key, payload)] => Ok(Step {
                    kind: StepKind::Directive {
                        key: (*key).clone(),
                        payload: (*payload).clone(),
                    },
                    name,
                    on_error,
                }),
                [] => Err(EngineError::Schema("step has no action key".to_string())),
                many => {
                    let keys: Vec<&str> = many.iter().map(|(key, _)| key.as_str()).collect();
                    Err(EngineError::Schema(format!(
                        "step must have exactly one action key, found: {}",
                        keys.join(", ")
                    )))
                }
            }
        }
        _ => Err(EngineError::Schema(
            "step must be a string or a mapping".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIAGE: &str = r#"
self:
  id: support.triage
  intent: Route tickets
operations:
  default:
    - set_memory:
        ticket: "${input.ticket}"
    - condition:
        if: "${memory.ticket} !== undefined"
        then:
          - "queue.enqueue: ${memory.ticket}"
    - return: "${memory.ticket}"
  ping:
    - "util.timestamp"
concern:
  if: "${memory.error_count} > 3"
  priority: 10
  action:
    - log.warn: { message: "degraded" }
"#;

    #[test]
    fn parses_a_full_document() {
        let doc = AgentDocument::from_str(TRIAGE).unwrap();
        assert_eq!(doc.identity.id, "support.triage");
        assert_eq!(doc.identity.intent.as_deref(), Some("Route tickets"));
        assert_eq!(doc.operations.len(), 2);
        assert_eq!(doc.operations["default"].len(), 3);
        let concern = doc.concern.unwrap();
        assert_eq!(concern.condition, "${memory.error_count} > 3");
        assert_eq!(concern.action.len(), 1);
    }

    #[test]
    fn json_documents_parse_too() {
        let doc = AgentDocument::from_str(
            r#"{"operations": {"default": [{"return": 1}]}}"#,
        )
        .unwrap();
        assert!(doc.has_operation("default"));
    }

    #[test]
    fn operation_as_mapping_is_a_schema_error() {
        let err = AgentDocument::from_str(
            "operations:\n  foo:\n    bar: baz\n",
        )
        .unwrap_err();
        match err {
            EngineError::Schema(reason) => {
                assert!(reason.contains("operations.foo"), "got: {reason}")
            }
            other => panic!("expected Schema, got {other:?}"),
        }
    }

    #[test]
    fn missing_operations_is_a_schema_error() {
        let err = AgentDocument::from_str("self:\n  id: empty\n").unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn non_string_id_is_a_schema_error() {
        let err = AgentDocument::from_str(
            "self:\n  id: 42\noperations:\n  default: []\n",
        )
        .unwrap_err();
        match err {
            EngineError::Schema(reason) => assert!(reason.contains("self.id")),
            other => panic!("expected Schema, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = AgentDocument::from_str(": {{ not valid").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn step_with_two_action_keys_is_rejected() {
        let err = AgentDocument::from_str(
            "operations:\n  default:\n    - set_memory: { a: 1 }\n      return: 2\n",
        )
        .unwrap_err();
        match err {
            EngineError::Schema(reason) => {
                assert!(reason.contains("exactly one action key"), "got: {reason}")
            }
            other => panic!("expected Schema, got {other:?}"),
        }
    }

    #[test]
    fn modifiers_ride_alongside_the_action_key() {
        let doc = AgentDocument::from_str(
            "operations:\n  default:\n    - http.get: { url: \"https://example.com\" }\n      name: fetch\n      on_error: continue\n",
        )
        .unwrap();
        let step = &doc.operations["default"][0];
        assert_eq!(step.display_name(), "fetch");
        assert_eq!(step.on_error, OnError::Continue);
        match &step.kind {
            StepKind::Directive { key, .. } => assert_eq!(key, "http.get"),
            other => panic!("expected directive, got {other:?}"),
        }
    }

    #[test]
    fn shorthand_display_name_is_the_function_part() {
        let doc = AgentDocument::from_str(
            "operations:\n  default:\n    - \"notify.send: hello\"\n",
        )
        .unwrap();
        assert_eq!(doc.operations["default"][0].display_name(), "notify.send");
    }

    #[test]
    fn concern_without_action_is_rejected() {
        let err = AgentDocument::from_str(
            "operations:\n  default: []\nconcern:\n  if: \"true\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn round_trips_through_to_value() {
        let doc = AgentDocument::from_str(TRIAGE).unwrap();
        let rendered = serde_yaml::to_string(&doc.to_value()).unwrap();
        let reparsed = AgentDocument::from_str(&rendered).unwrap();
        assert_eq!(reparsed.identity.id, doc.identity.id);
        assert_eq!(reparsed.operations.len(), doc.operations.len());
        assert_eq!(
            reparsed.operations["default"].len(),
            doc.operations["default"].len()
        );
    }
}
