//! Fact memory trait: durable key/value facts with importance and expiry.
//!
//! Facts are extracted from finished exchanges and read back when a new
//! run assembles its system prompt. Stores serialize writes and allow
//! concurrent reads.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// Importance bounds for a fact.
pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 10;

/// A single remembered fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    /// Stable identifier; storing a fact with an existing key replaces it
    pub key: String,

    /// The fact itself
    pub value: String,

    /// 1 (trivia) to 10 (critical)
    pub importance: u8,

    /// When this fact was created
    pub created_at: DateTime<Utc>,

    /// Lifetime in seconds; `None` keeps the fact until forgotten
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl MemoryFact {
    /// Create a fact, clamping importance into range.
    pub fn new(key: impl Into<String>, value: impl Into<String>, importance: u8) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            importance: importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE),
            created_at: Utc::now(),
            ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl_secs
            .map(|secs| self.created_at + Duration::seconds(secs.min(i64::MAX as u64) as i64))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Reject facts a store must not persist.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.key.trim().is_empty() {
            return Err(MemoryError::InvalidFact("key must not be empty".into()));
        }
        if !(MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&self.importance) {
            return Err(MemoryError::InvalidFact(format!(
                "importance {} outside {MIN_IMPORTANCE}..={MAX_IMPORTANCE}",
                self.importance
            )));
        }
        Ok(())
    }

    /// Case-insensitive keyword match against key and value.
    ///
    /// An empty query matches everything.
    pub fn matches(&self, query: &str) -> bool {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() > 2)
            .collect();
        if words.is_empty() {
            return true;
        }
        let haystack = format!("{} {}", self.key, self.value).to_lowercase();
        words.iter().any(|w| haystack.contains(w.as_str()))
    }
}

/// Order facts by importance, then most recent first.
pub fn rank_facts(facts: &mut [MemoryFact]) {
    facts.sort_by(|a, b| {
        b.importance
            .cmp(&a.importance)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// The core FactStore trait.
///
/// Implementations: in-memory (tests, short sessions) and JSONL file.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Store a fact, replacing any fact with the same key.
    async fn store(&self, fact: MemoryFact) -> Result<(), MemoryError>;

    /// Get a live fact by key.
    async fn get(&self, key: &str) -> Result<Option<MemoryFact>, MemoryError>;

    /// Live facts matching the query, ranked by importance then recency.
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<MemoryFact>, MemoryError>;

    /// Delete a fact. Returns whether it existed.
    async fn forget(&self, key: &str) -> Result<bool, MemoryError>;

    /// Drop expired facts. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, MemoryError>;

    /// Number of live facts.
    async fn count(&self) -> Result<usize, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_is_clamped() {
        assert_eq!(MemoryFact::new("a", "b", 0).importance, 1);
        assert_eq!(MemoryFact::new("a", "b", 42).importance, 10);
        assert_eq!(MemoryFact::new("a", "b", 7).importance, 7);
    }

    #[test]
    fn ttl_expiry() {
        let mut fact = MemoryFact::new("db", "postgres 16", 5).with_ttl(60);
        let now = Utc::now();
        assert!(!fact.is_expired_at(now));
        assert!(fact.is_expired_at(now + Duration::seconds(61)));
        fact.ttl_secs = None;
        assert!(!fact.is_expired_at(now + Duration::days(3650)));
    }

    #[test]
    fn validate_rejects_blank_key() {
        let fact = MemoryFact::new("  ", "x", 3);
        assert!(matches!(fact.validate(), Err(MemoryError::InvalidFact(_))));
        let mut fact = MemoryFact::new("k", "x", 3);
        fact.importance = 0;
        assert!(fact.validate().is_err());
    }

    #[test]
    fn keyword_matching() {
        let fact = MemoryFact::new("user_language", "Prefers Rust for backend work", 8);
        assert!(fact.matches("which LANGUAGE"));
        assert!(fact.matches("rust"));
        assert!(!fact.matches("python django"));
        assert!(fact.matches(""));
    }

    #[test]
    fn ranking_prefers_importance_then_recency() {
        let now = Utc::now();
        let mut old_high = MemoryFact::new("a", "x", 9);
        old_high.created_at = now - Duration::hours(2);
        let mut new_low = MemoryFact::new("b", "x", 3);
        new_low.created_at = now;
        let mut new_high = MemoryFact::new("c", "x", 9);
        new_high.created_at = now;

        let mut facts = vec![new_low, old_high, new_high];
        rank_facts(&mut facts);
        let keys: Vec<&str> = facts.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn fact_serialization_skips_missing_ttl() {
        let json = serde_json::to_string(&MemoryFact::new("k", "v", 4)).unwrap();
        assert!(!json.contains("ttl_secs"));
        let back: MemoryFact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, "k");
    }
}
