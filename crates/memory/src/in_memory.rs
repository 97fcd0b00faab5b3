//! In-memory fact store, useful for testing and ephemeral sessions.

use agentloop_core::error::MemoryError;
use agentloop_core::memory::{FactStore, MemoryFact};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::select_facts;

/// Facts keyed by `MemoryFact::key`, held behind a read/write lock.
#[derive(Clone, Default)]
pub struct InMemoryFactStore {
    facts: Arc<RwLock<HashMap<String, MemoryFact>>>,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, fact: MemoryFact) -> Result<(), MemoryError> {
        fact.validate()?;
        self.facts.write().await.insert(fact.key.clone(), fact);
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
        Ok(self.facts.write().await.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize, MemoryError> {
        let now = Utc::now();
        let mut facts = self.facts.write().await;
        let before = facts.len();
        facts.retain(|_, f| !f.is_expired_at(now));
        Ok(before - facts.len())
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let now = Utc::now();
        let facts = self.facts.read().await;
        Ok(facts.values().filter(|f| !f.is_expired_at(now)).count())
    }
}
