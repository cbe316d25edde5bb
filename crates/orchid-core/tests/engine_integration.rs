//! Integration tests for the engine: full runs through the public
//! interpreter entry, including capability synthesis against a scripted
//! inference service, with a temp directory per test for isolation.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use orchid_core::directory::MemoryDirectory;
use orchid_core::events::EventKind;
use orchid_core::llm::StaticInference;
use orchid_core::{EngineConfig, Interpreter, RunRequest};

/// Engine whose inference service replays `replies` in order and then
/// fails, so any unscripted generation shows up as a hard error.
async fn engine_with(dir: &TempDir, replies: Vec<&str>) -> Interpreter {
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
        .expect("engine should build")
}

fn write_agent(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write agent document");
    path.display().to_string()
}

fn drain_kinds(
    rx: &mut tokio::sync::broadcast::Receiver<orchid_core::events::EngineEvent>,
) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

#[tokio::test]
async fn test_operations_chain_through_run_steps() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, vec![]).await;
    write_agent(
        &dir,
        "chainer.yaml",
        r#"
self:
  id: chainer
operations:
  op1:
    - run:
        agent: chainer
        operation: op2
        input:
          x: 5
  op2:
    - set_memory:
        y: "${input.x} plus one"
    - return: ${memory.y}
"#,
    );

    let mut request = RunRequest::new("chainer");
    request.operation = Some("op1".to_string());
    let outcome = engine.run(request).await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.result.expect("result"), json!("5 plus one"));
}

#[tokio::test]
async fn test_flat_operation_trace_is_complete() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, vec![]).await;
    let file = write_agent(
        &dir,
        "flat.yaml",
        r#"
self:
  id: flat
operations:
  default:
    - set_memory:
        a: 1
    - "util.uuid"
    - return: done
"#,
    );

    let outcome = engine.run(RunRequest::new(file)).await;

    assert!(outcome.success);
    assert_eq!(outcome.trace.len(), 3);
    assert!(outcome.trace.iter().all(|entry| entry.success));
    let steps: Vec<&str> = outcome.trace.iter().map(|e| e.step.as_str()).collect();
    assert_eq!(steps, vec!["set_memory", "util.uuid", "return"]);
}

#[tokio::test]
async fn test_missing_capability_is_synthesized_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let generated_module = r#"```yaml
self:
  id: text
  intent: generated text helpers
operations:
  shout:
    - set_memory:
        line: "LOUD ${input.value}"
    - return:
        text: ${memory.line}
```"#;
    let engine = engine_with(&dir, vec![generated_module]).await;
    let mut events = engine.events().subscribe();

    let file = write_agent(
        &dir,
        "needs-shout.yaml",
        r#"
self:
  id: needs-shout
operations:
  default:
    - "text.shout: hello"
"#,
    );

    let first = engine.run(RunRequest::new(file.clone())).await;
    assert!(first.success, "error: {:?}", first.error);

    let result = first.result.expect("result");
    assert_eq!(result["text"], json!("LOUD hello"));
    // Generated modules tag their object results with provenance.
    assert_eq!(result["_auto_generated"], json!(true));
    assert!(result.get("_generated_at").is_some());

    // The module was materialized and recorded for later processes.
    let module_file = engine.config().modules_path().join("text.yaml");
    assert!(module_file.exists());
    let record = engine
        .directory()
        .resolve("text.shout")
        .await
        .expect("directory lookup")
        .expect("record");
    assert!(record.auto_generated);

    let kinds = drain_kinds(&mut events);
    assert!(kinds.contains(&EventKind::SynthesisStarted));
    assert!(kinds.contains(&EventKind::SynthesisSucceeded));

    // The inference script is exhausted: a second synthesis attempt
    // would fail loudly. The registered module answers instead.
    let second = engine.run(RunRequest::new(file)).await;
    assert!(second.success, "error: {:?}", second.error);
    assert_eq!(second.result.expect("result")["text"], json!("LOUD hello"));

    let kinds = drain_kinds(&mut events);
    assert!(!kinds.contains(&EventKind::SynthesisStarted));
}

#[tokio::test]
async fn test_failures_inside_resolvable_modules_never_synthesize() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, vec![]).await;
    let mut events = engine.events().subscribe();

    // A handwritten module at the conventional path whose operation
    // fails at runtime: no channel is bound, so prompting errors.
    let modules_dir = engine.config().modules_path();
    std::fs::create_dir_all(&modules_dir).expect("create modules dir");
    std::fs::write(
        modules_dir.join("math.yaml"),
        r#"
self:
  id: math
operations:
  double:
    - prompt.user: need a number
"#,
    )
    .expect("write module");

    let file = write_agent(
        &dir,
        "needs-math.yaml",
        r#"
self:
  id: needs-math
operations:
  default:
    - math.double:
        value: 2
"#,
    );

    let outcome = engine.run(RunRequest::new(file)).await;

    assert!(!outcome.success);
    assert!(outcome.error.expect("error").contains("no channel bound"));
    let kinds = drain_kinds(&mut events);
    assert!(!kinds.contains(&EventKind::SynthesisStarted));
}

#[tokio::test]
async fn test_invalid_generated_module_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    // The generator replies with a module that lacks the required
    // operation, so validation must reject it before anything lands.
    let bad_module = r#"
self:
  id: text
operations:
  whisper:
    - return: quiet
"#;
    let engine = engine_with(&dir, vec![bad_module]).await;
    let mut events = engine.events().subscribe();

    let file = write_agent(
        &dir,
        "needs-shout.yaml",
        r#"
self:
  id: needs-shout
operations:
  default:
    - "text.shout: hello"
"#,
    );

    let outcome = engine.run(RunRequest::new(file)).await;

    assert!(!outcome.success);
    assert!(outcome
        .error
        .expect("error")
        .contains("generation failed"));
    assert!(!engine.config().modules_path().join("text.yaml").exists());
    let record = engine
        .directory()
        .resolve("text.shout")
        .await
        .expect("directory lookup");
    assert!(record.is_none());

    let kinds = drain_kinds(&mut events);
    assert!(kinds.contains(&EventKind::SynthesisStarted));
    assert!(kinds.contains(&EventKind::SynthesisFailed));
    assert!(!kinds.contains(&EventKind::SynthesisSucceeded));
}

#[tokio::test]
async fn test_rollback_restores_an_earlier_revision() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, vec![]).await;
    let file = write_agent(
        &dir,
        "editable.yaml",
        r#"
self:
  id: editable
operations:
  default:
    - return: v1
  to_v2:
    - self.modify:
        operation: default
        steps:
          - return: v2
  to_v3:
    - self.modify:
        operation: default
        steps:
          - return: v3
"#,
    );

    let mut request = RunRequest::new(file.clone());
    request.operation = Some("to_v2".to_string());
    let modified = engine.run(request).await;
    assert!(modified.success);
    let v2_hash = modified.result.expect("result")["revision"]
        .as_str()
        .expect("revision hash")
        .to_string();

    let mut request = RunRequest::new(file.clone());
    request.operation = Some("to_v3".to_string());
    assert!(engine.run(request).await.success);

    let now = engine.run(RunRequest::new(file.clone())).await;
    assert_eq!(now.result.expect("result"), json!("v3"));

    // The source file is untouched and both snapshots remain readable.
    assert!(std::fs::read_to_string(&file)
        .expect("source")
        .contains("return: v1"));
    let history = engine.revisions().history("editable").expect("history");
    assert_eq!(history.len(), 2);

    engine
        .revisions()
        .rollback("editable", &v2_hash)
        .expect("rollback");
    let rolled = engine.run(RunRequest::new(file)).await;
    assert_eq!(rolled.result.expect("result"), json!("v2"));
}

#[tokio::test]
async fn test_condition_branches_leave_no_trace_when_untaken() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&dir, vec![]).await;
    let file = write_agent(
        &dir,
        "brancher.yaml",
        r#"
self:
  id: brancher
operations:
  default:
    - condition:
        if: ${input.level} > 10
        then:
          - set_memory:
              escalated: true
    - return: checked
"#,
    );

    let mut request = RunRequest::new(file);
    request.input = json!({ "level": 3 }).as_object().cloned().unwrap();
    let outcome = engine.run(request).await;

    assert!(outcome.success);
    // Only the condition step and the return: the untaken branch adds
    // no entries.
    assert_eq!(outcome.trace.len(), 2);
    assert!(outcome.context.memory.get("escalated").is_none());
}
