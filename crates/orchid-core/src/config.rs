//! Engine configuration.
//!
//! Everything the engine needs to know about its environment lives here:
//! where agent documents are searched, where generated modules and
//! revisions are written, how long loaded documents stay cached, and how
//! the inference service is reached. Defaults work out of the box; the
//! CLI overrides them from flags and `ORCHID_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for engine-owned state (directory db, modules, revisions).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directories searched when a document is referenced by bare name.
    #[serde(default = "default_agent_dirs")]
    pub agent_dirs: Vec<PathBuf>,

    /// Where generated capability modules are written. Defaults to
    /// `<data_dir>/modules` when unset.
    #[serde(default)]
    pub modules_dir: Option<PathBuf>,

    /// Document cache time-to-live in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key. Read at call time so a
    /// long-lived process picks up rotation without restart.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".orchid"))
        .unwrap_or_else(|| PathBuf::from(".orchid"))
}

fn default_agent_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("agents"),
        PathBuf::from("workflows"),
        PathBuf::from("."),
    ]
}

fn default_cache_ttl_ms() -> u64 {
    5000
}

fn default_base_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_api_key_env() -> String {
    "ORCHID_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: default_data_dir(),
            agent_dirs: default_agent_dirs(),
            modules_dir: None,
            cache_ttl_ms: default_cache_ttl_ms(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ORCHID_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        if let Ok(dir) = std::env::var("ORCHID_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dirs) = std::env::var("ORCHID_AGENT_DIRS") {
            let parsed: Vec<PathBuf> = dirs
                .split(':')
                .filter(|part| !part.is_empty())
                .map(PathBuf::from)
                .collect();
            if !parsed.is_empty() {
                config.agent_dirs = parsed;
            }
        }
        if let Ok(dir) = std::env::var("ORCHID_MODULES_DIR") {
            config.modules_dir = Some(PathBuf::from(dir));
        }
        if let Ok(ttl) = std::env::var("ORCHID_CACHE_TTL_MS") {
            if let Ok(parsed) = ttl.parse::<u64>() {
                config.cache_ttl_ms = parsed;
            }
        }
        if let Ok(url) = std::env::var("ORCHID_BASE_URL") {
            config.inference.base_url = url;
        }
        if let Ok(model) = std::env::var("ORCHID_MODEL") {
            config.inference.model = model;
        }
        config
    }

    pub fn modules_path(&self) -> PathBuf {
        self.modules_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("modules"))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_millis(5000));
        assert!(config.modules_path().ends_with("modules"));
        assert_eq!(config.agent_dirs.len(), 3);
    }

    #[test]
    fn modules_dir_override_wins() {
        let config = EngineConfig {
            modules_dir: Some(PathBuf::from("/tmp/custom-modules")),
            ..EngineConfig::default()
        };
        assert_eq!(config.modules_path(), PathBuf::from("/tmp/custom-modules"));
    }
}
