//! File-based fact store: persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `MemoryFact`. Facts are loaded into memory
//! on creation and the whole file is rewritten on every mutation, while
//! the write lock is held, so concurrent writers never interleave. A
//! mutation reaches the in-memory map only once the file write succeeded.
//!
//! Default location: `~/.agentloop/facts.jsonl`

use agentloop_core::error::MemoryError;
use agentloop_core::memory::{FactStore, MemoryFact};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::select_facts;

/// A file-backed fact store using JSONL (one JSON object per line).
pub struct FileFactStore {
    path: PathBuf,
    facts: Arc<RwLock<HashMap<String, MemoryFact>>>,
}

impl FileFactStore {
    /// Open the store at `path`.
    ///
    /// A missing file starts empty and is created on first write.
    pub fn new(path: PathBuf) -> Self {
        let facts = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = facts.len(), "File fact store loaded");
        Self {
            path,
            facts: Arc::new(RwLock::new(facts)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load facts from a JSONL file. Later lines win for duplicate keys.
    fn load_from_disk(path: &Path) -> HashMap<String, MemoryFact> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryFact>(line) {
                Ok(fact) => Some((fact.key.clone(), fact)),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted fact line");
                    None
                }
            })
            .collect()
    }

    /// Write all facts to disk as JSONL, oldest first.
    fn flush(&self, facts: &HashMap<String, MemoryFact>) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut ordered: Vec<&MemoryFact> = facts.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key)));

        let mut content = String::new();
        for fact in ordered {
            let line = serde_json::to_string(fact)
                .map_err(|e| MemoryError::Storage(format!("Failed to serialize fact: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| MemoryError::Storage(format!("Failed to write fact file: {e}")))
    }
}

#[async_trait]
impl FactStore for FileFactStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(&self, fact: MemoryFact) -> Result<(), MemoryError> {
        fact.validate()?;
        let mut facts = self.facts.write().await;
        let mut next = facts.clone();
        next.insert(fact.key.clone(), fact);
        self.flush(&next)?;
        *facts = next;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryFact>, MemoryError> {
        let facts = self.facts.read().await;
        Ok(facts.get(key).filter(|f| !f.is_expired()).cloned())
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<MemoryFact>, MemoryError> {
        let facts = self.facts.read().await;
        Ok(select_facts(facts.values(), query, limit, Utc::now()))
    }

    async fn forget(&self, key: &str) -> Result<bool, MemoryError> {
        let mut facts = self.facts.write().await;
        if !facts.contains_key(key) {
            return Ok(false);
        }
        let mut next = facts.clone();
        next.remove(key);
        self.flush(&next)?;
        *facts = next;
        Ok(true)
    }

    async fn purge_expired(&self) -> Result<usize, MemoryError> {
        let now = Utc::now();
        let mut facts = self.facts.write().await;
        let mut next = facts.clone();
        next.retain(|_, f| !f.is_expired_at(now));
        let purged = facts.len() - next.len();
        if purged > 0 {
            self.flush(&next)?;
            *facts = next;
            debug!(purged, "Purged expired facts");
        }
        Ok(purged)
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let now = Utc::now();
        let facts = self.facts.read().await;
        Ok(facts.values().filter(|f| !f.is_expired_at(now)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_path() -> PathBuf {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp); // Close file so the store can recreate it
        path
    }

    #[tokio::test]
    async fn store_and_reload_persists() {
        let path = temp_path();

        let store = FileFactStore::new(path.clone());
        store
            .store(MemoryFact::new("deploy_window", "Deploys happen on Tuesdays", 7))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Deploys happen on Tuesdays"));

        let reopened = FileFactStore::new(path);
        let fact = reopened.get("deploy_window").await.unwrap().unwrap();
        assert_eq!(fact.importance, 7);
    }

    #[tokio::test]
    async fn forget_persists() {
        let path = temp_path();
        let store = FileFactStore::new(path.clone());
        store.store(MemoryFact::new("k", "to be forgotten", 5)).await.unwrap();
        assert!(store.forget("k").await.unwrap());

        let reopened = FileFactStore::new(path);
        assert!(reopened.get("k").await.unwrap().is_none());
        assert_eq!(reopened.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_rewrites_file_without_expired_facts() {
        let path = temp_path();
        let store = FileFactStore::new(path.clone());
        let mut stale = MemoryFact::new("stale", "expired", 5).with_ttl(1);
        stale.created_at = Utc::now() - Duration::seconds(30);
        store.store(stale).await.unwrap();
        store.store(MemoryFact::new("live", "still here", 5)).await.unwrap();

        assert!(store.retrieve("", 10).await.unwrap().iter().all(|f| f.key == "live"));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale"));
        assert!(content.contains("live"));
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("facts.jsonl");
        let store = FileFactStore::new(path.clone());
        store.store(MemoryFact::new("k", "v", 1)).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "").unwrap();
        let store = FileFactStore::new(blocker.join("facts.jsonl"));

        let err = store.store(MemoryFact::new("k", "v", 3)).await.unwrap_err();
        assert!(matches!(err, MemoryError::Storage(_)));
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handles_missing_file_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFactStore::new(dir.path().join("absent.jsonl"));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handles_corrupted_lines() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"key":"a","value":"valid","importance":4,"created_at":"2026-01-01T00:00:00Z"}}"#).unwrap();
        writeln!(tmp, "this is not json").unwrap();
        writeln!(tmp, r#"{{"key":"b","value":"also valid","importance":6,"created_at":"2026-01-01T00:00:00Z"}}"#).unwrap();

        let store = FileFactStore::new(tmp.path().to_path_buf());
        assert_eq!(store.count().await.unwrap(), 2);
        let ranked = store.retrieve("valid", 10).await.unwrap();
        assert_eq!(ranked[0].key, "b");
    }
}
