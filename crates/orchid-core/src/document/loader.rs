//! Document loading with a short-lived path cache.
//!
//! Documents are cached by path with a TTL (default 5s) so tight loops
//! and recursive runs do not re-read and re-validate the same file.
//! Entries are `Arc`-shared and replaced whole on refresh, never mutated
//! in place, so a concurrent reader keeps a consistent snapshot.
//!
//! Besides filesystem paths the loader serves *static documents*:
//! engine-embedded workflows registered under virtual `orchid://` keys
//! (the module generator lives there).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::document::{parse_document, AgentDocument};
use crate::error::EngineError;

struct CacheEntry {
    doc: Arc<AgentDocument>,
    loaded_at: Instant,
}

pub struct DocumentLoader {
    ttl: Duration,
    cache: RwLock<HashMap<PathBuf, CacheEntry>>,
    statics: HashMap<String, Arc<AgentDocument>>,
}

impl DocumentLoader {
    pub fn new(ttl: Duration) -> Self {
        DocumentLoader {
            ttl,
            cache: RwLock::new(HashMap::new()),
            statics: HashMap::new(),
        }
    }

    /// Registers an engine-embedded document under a virtual key such as
    /// `orchid://system/module-generator`. Static documents never expire.
    pub fn register_static(&mut self, key: &str, doc: AgentDocument) {
        self.statics.insert(key.to_string(), Arc::new(doc));
    }

    pub fn is_static(&self, key: &str) -> bool {
        self.statics.contains_key(key)
    }

    pub async fn load(&self, path: &Path) -> Result<Arc<AgentDocument>, EngineError> {
        let key = path.to_string_lossy();
        if let Some(doc) = self.statics.get(key.as_ref()) {
            return Ok(Arc::clone(doc));
        }

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(path) {
                if entry.loaded_at.elapsed() <= self.ttl {
                    return Ok(Arc::clone(&entry.doc));
                }
            }
        }

        let text = tokio::fs::read_to_string(path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(path.display().to_string())
            } else {
                EngineError::Io(err)
            }
        })?;

        let doc = Arc::new(parse_document(&text, Some(path))?);

        let mut cache = self.cache.write().await;
        cache.insert(
            path.to_path_buf(),
            CacheEntry {
                doc: Arc::clone(&doc),
                loaded_at: Instant::now(),
            },
        );
        tracing::debug!("[Loader] loaded {} ({} operations)", path.display(), doc.operations.len());

        Ok(doc)
    }

    pub async fn invalidate(&self, path: &Path) {
        self.cache.write().await.remove(path);
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }
}
