//! Document revision store.
//!
//! Self-modification never rewrites a source file in place. Each accepted
//! modification is snapshotted content-addressed under
//! `<data_dir>/revisions/<agent>/<sha256>.yaml` and a `HEAD` file points
//! at the active hash. The interpreter checks `HEAD` after loading a
//! document, so a revised agent takes effect on its next run, and
//! rollback is just moving `HEAD` to an older hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::EngineError;

const HEAD_FILE: &str = "HEAD";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSnapshot {
    pub agent_id: String,
    pub hash: String,
    pub path: PathBuf,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RevisionStore {
    root: PathBuf,
}

impl RevisionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RevisionStore { root: root.into() }
    }

    /// Snapshot `content` as the new head revision for `agent_id`.
    /// Identical content re-uses the existing snapshot file.
    pub fn record(&self, agent_id: &str, content: &str) -> Result<RevisionSnapshot, EngineError> {
        let dir = self.agent_dir(agent_id);
        std::fs::create_dir_all(&dir)?;

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        let path = dir.join(format!("{hash}.yaml"));
        if !path.exists() {
            std::fs::write(&path, content)?;
        }
        std::fs::write(dir.join(HEAD_FILE), &hash)?;

        tracing::info!(
            "[Revisions] recorded revision {} for agent {}",
            &hash[..12],
            agent_id
        );
        Ok(RevisionSnapshot {
            agent_id: agent_id.to_string(),
            hash,
            path,
            created_at: Utc::now().to_rfc3339(),
        })
    }

    /// Content of the head revision, or `None` when the agent has never
    /// been revised.
    pub fn current(&self, agent_id: &str) -> Result<Option<String>, EngineError> {
        let Some(hash) = self.head(agent_id)? else {
            return Ok(None);
        };
        let path = self.agent_dir(agent_id).join(format!("{hash}.yaml"));
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn head(&self, agent_id: &str) -> Result<Option<String>, EngineError> {
        let path = self.agent_dir(agent_id).join(HEAD_FILE);
        match std::fs::read_to_string(&path) {
            Ok(hash) => Ok(Some(hash.trim().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// All snapshots for `agent_id`, oldest first.
    pub fn history(&self, agent_id: &str) -> Result<Vec<RevisionSnapshot>, EngineError> {
        let dir = self.agent_dir(agent_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            let hash = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            snapshots.push((
                modified,
                RevisionSnapshot {
                    agent_id: agent_id.to_string(),
                    hash,
                    path,
                    created_at: modified.to_rfc3339(),
                },
            ));
        }
        snapshots.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.hash.cmp(&b.1.hash)));
        Ok(snapshots.into_iter().map(|(_, snapshot)| snapshot).collect())
    }

    /// Move `HEAD` back to an existing snapshot.
    pub fn rollback(&self, agent_id: &str, hash: &str) -> Result<(), EngineError> {
        let dir = self.agent_dir(agent_id);
        let path = dir.join(format!("{hash}.yaml"));
        if !path.exists() {
            return Err(EngineError::NotFound(format!(
                "revision `{hash}` for agent `{agent_id}`"
            )));
        }
        std::fs::write(dir.join(HEAD_FILE), hash)?;
        tracing::info!(
            "[Revisions] rolled agent {} back to revision {}",
            agent_id,
            &hash[..hash.len().min(12)]
        );
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join(safe_component(agent_id))
    }
}

/// Agent ids land in directory names; anything path-hostile becomes `-`,
/// and the result is never a traversal component.
fn safe_component(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "anonymous".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_current_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RevisionStore::new(dir.path());

        assert!(store.current("helper").unwrap().is_none());
        let snapshot = store.record("helper", "identity:\n  id: helper\n").unwrap();
        assert_eq!(snapshot.hash.len(), 64);
        assert_eq!(
            store.current("helper").unwrap().unwrap(),
            "identity:\n  id: helper\n"
        );
    }

    #[test]
    fn head_follows_latest_record_and_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let store = RevisionStore::new(dir.path());

        let first = store.record("helper", "version: 1\n").unwrap();
        let second = store.record("helper", "version: 2\n").unwrap();
        assert_eq!(store.head("helper").unwrap().unwrap(), second.hash);
        assert_eq!(store.current("helper").unwrap().unwrap(), "version: 2\n");

        store.rollback("helper", &first.hash).unwrap();
        assert_eq!(store.current("helper").unwrap().unwrap(), "version: 1\n");
    }

    #[test]
    fn rollback_to_unknown_hash_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = RevisionStore::new(dir.path());
        store.record("helper", "x: 1\n").unwrap();
        assert!(store.rollback("helper", "deadbeef").is_err());
    }

    #[test]
    fn identical_content_shares_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = RevisionStore::new(dir.path());
        let first = store.record("helper", "same\n").unwrap();
        let second = store.record("helper", "same\n").unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(store.history("helper").unwrap().len(), 1);
    }

    #[test]
    fn hostile_ids_stay_inside_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = RevisionStore::new(dir.path());
        store.record("../escape/attempt", "x: 1\n").unwrap();
        assert!(store.current("../escape/attempt").unwrap().is_some());
        assert!(dir.path().join("..-escape-attempt").exists());
    }
}
