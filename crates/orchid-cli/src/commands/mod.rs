//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and drives the
//! engine through the same public API an embedding server would use.

pub mod capability;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use orchid_core::EngineConfig;

/// Engine configuration from `ORCHID_*` environment variables with the
/// CLI flag overrides applied on top.
pub fn engine_config(data_dir: Option<&str>, agent_dirs: &[String]) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(dir) = data_dir {
        config.data_dir = PathBuf::from(dir);
    }
    for dir in agent_dirs.iter().rev() {
        config.agent_dirs.insert(0, PathBuf::from(dir));
    }
    config
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
