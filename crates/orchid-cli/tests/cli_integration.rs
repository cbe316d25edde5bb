//! Integration tests for the orchid-cli commands.
//!
//! These tests verify the CLI glue by exercising the same command
//! functions the binary dispatches to, with a temp directory per test
//! for isolation.

use serde_json::json;
use tempfile::TempDir;

use orchid_cli::commands;
use orchid_core::EngineConfig;

fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        data_dir: dir.path().join("data"),
        agent_dirs: vec![dir.path().to_path_buf()],
        ..EngineConfig::default()
    }
}

fn write_agent(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write agent document");
    path.display().to_string()
}

#[tokio::test]
async fn test_run_executes_an_operation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write_agent(
        &dir,
        "greeter.yaml",
        r#"
self:
  id: greeter
operations:
  default:
    - set_memory:
        line: "hello ${input.name}"
    - return: ${memory.line}
"#,
    );

    let result = commands::run::run(
        test_config(&dir),
        &file,
        "default",
        r#"{"name":"ana"}"#,
        None,
        true,
    )
    .await;

    assert!(result.is_ok(), "run failed: {:?}", result);
}

#[tokio::test]
async fn test_run_reports_missing_operations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write_agent(
        &dir,
        "greeter.yaml",
        r#"
self:
  id: greeter
operations:
  default:
    - return: ok
"#,
    );

    let result = commands::run::run(test_config(&dir), &file, "nope", "{}", None, false).await;

    let error = result.expect_err("missing operation should fail the command");
    assert!(error.contains("nope"), "unexpected error: {}", error);
}

#[tokio::test]
async fn test_run_rejects_invalid_input_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write_agent(
        &dir,
        "greeter.yaml",
        r#"
self:
  id: greeter
operations:
  default:
    - return: ok
"#,
    );

    let result =
        commands::run::run(test_config(&dir), &file, "default", "not json", None, false).await;

    let error = result.expect_err("malformed input should fail before the run");
    assert!(error.contains("--input"), "unexpected error: {}", error);
}

#[test]
fn test_scalar_input_arrives_as_value() {
    let input = commands::run::parse_input("5").expect("scalar input");
    assert_eq!(input.get("value"), Some(&json!(5)));

    let input = commands::run::parse_input("null").expect("null input");
    assert!(input.is_empty());

    let input = commands::run::parse_input(r#"{"a":1}"#).expect("object input");
    assert_eq!(input.get("a"), Some(&json!(1)));
}

#[tokio::test]
async fn test_validate_accepts_a_wellformed_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write_agent(
        &dir,
        "triage.yaml",
        r#"
self:
  id: triage
  intent: Route tickets by severity
operations:
  default:
    - set_memory:
        seen: true
    - return: routed
concern:
  if: ${memory.backlog} > 10
  action:
    - "log.warn: backlog is growing"
"#,
    );

    let result = commands::validate::run(&file).await;
    assert!(result.is_ok(), "validate failed: {:?}", result);
}

#[tokio::test]
async fn test_validate_rejects_object_operations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = write_agent(
        &dir,
        "broken.yaml",
        r#"
self:
  id: broken
operations:
  default:
    not: a list
"#,
    );

    let error = commands::validate::run(&file)
        .await
        .expect_err("object-shaped operation should be rejected");
    assert!(
        error.contains("not a valid agent document"),
        "unexpected error: {}",
        error
    );
}

#[tokio::test]
async fn test_validate_reports_unreadable_files() {
    let error = commands::validate::run("/nonexistent/agent.yaml")
        .await
        .expect_err("missing file should be reported");
    assert!(error.contains("cannot read"), "unexpected error: {}", error);
}

#[tokio::test]
async fn test_capability_resolve_finds_builtins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = commands::capability::resolve(test_config(&dir), "log.info").await;
    assert!(result.is_ok(), "builtin lookup failed: {:?}", result);
}

#[tokio::test]
async fn test_capability_resolve_reports_unknown_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let error = commands::capability::resolve(test_config(&dir), "nothing.here")
        .await
        .expect_err("unknown capability should be reported");
    assert!(error.contains("synthesis"), "unexpected error: {}", error);
}

#[tokio::test]
async fn test_capability_list_handles_an_empty_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = commands::capability::list(test_config(&dir)).await;
    assert!(result.is_ok(), "list failed: {:?}", result);
}

#[test]
fn test_cli_flags_override_the_environment_config() {
    let config = commands::engine_config(Some("/tmp/orchid-test-state"), &["extra".to_string()]);
    assert_eq!(
        config.data_dir,
        std::path::PathBuf::from("/tmp/orchid-test-state")
    );
    assert_eq!(config.agent_dirs[0], std::path::PathBuf::from("extra"));
}
