//! Resilient memory: a bounded, TTL-evicting ring of past session
//! outcomes with cheap similarity retrieval.
//!
//! Writes never fail outward; storage errors increment a failure counter
//! and return `false`. Eviction is size-first (oldest out), then a TTL
//! scan. Similarity is token overlap over lowercased alphanumeric
//! tokens; a single shared token counts.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Max records returned by a similarity query.
const SIMILAR_LIMIT: usize = 5;

/// One remembered outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub envelope_json: Value,
    pub ts: u64,
}

/// Operational counters for the ring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub size: usize,
    pub evictions: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Bounded TTL ring of envelope snapshots.
#[derive(Debug)]
pub struct ResilientMemory {
    ring: VecDeque<MemoryRecord>,
    max: usize,
    ttl_ms: u64,
    evictions: u64,
    failures: u64,
    last_error: Option<String>,
}

impl ResilientMemory {
    pub fn new(max: usize, ttl_ms: u64) -> Self {
        Self {
            ring: VecDeque::new(),
            max: max.max(1),
            ttl_ms,
            evictions: 0,
            failures: 0,
            last_error: None,
        }
    }

    /// Store a snapshot. Never errors outward: a rejected write bumps the
    /// failure counter and returns `false`.
    pub fn add(&mut self, envelope_json: Value, now_ms: u64) -> bool {
        if envelope_json.is_null() {
            self.failures += 1;
            self.last_error = Some("refusing to store null snapshot".to_string());
            return false;
        }

        self.ring.push_back(MemoryRecord {
            envelope_json,
            ts: now_ms,
        });
        while self.ring.len() > self.max {
            self.ring.pop_front();
            self.evictions += 1;
        }
        self.evict_expired(now_ms);
        true
    }

    /// Remove records older than the TTL.
    pub fn evict_expired(&mut self, now_ms: u64) {
        let ttl = self.ttl_ms;
        let before = self.ring.len();
        self.ring.retain(|r| now_ms.saturating_sub(r.ts) <= ttl);
        self.evictions += (before - self.ring.len()) as u64;
    }

    /// The most recent records sharing at least one token with `query`,
    /// newest first, capped at five.
    pub fn similar(&self, query: &Value) -> Vec<&MemoryRecord> {
        let query_tokens = tokenize(&query.to_string());
        if query_tokens.is_empty() {
            return Vec::new();
        }
        self.ring
            .iter()
            .rev()
            .filter(|record| {
                let tokens = tokenize(&record.envelope_json.to_string());
                !tokens.is_disjoint(&query_tokens)
            })
            .take(SIMILAR_LIMIT)
            .collect()
    }

    pub fn metrics(&self) -> MemoryMetrics {
        MemoryMetrics {
            size: self.ring.len(),
            evictions: self.evictions,
            failures: self.failures,
            last_error: self.last_error.clone(),
        }
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_and_metrics() {
        let mut m = ResilientMemory::new(10, 1000);
        assert!(m.add(json!({"patch_id": "a"}), 0));
        let metrics = m.metrics();
        assert_eq!(metrics.size, 1);
        assert_eq!(metrics.evictions, 0);
        assert_eq!(metrics.failures, 0);
    }

    #[test]
    fn test_size_eviction_oldest_first() {
        let mut m = ResilientMemory::new(2, u64::MAX);
        m.add(json!({"id": "first"}), 0);
        m.add(json!({"id": "second"}), 1);
        m.add(json!({"id": "third"}), 2);
        let metrics = m.metrics();
        assert_eq!(metrics.size, 2);
        assert_eq!(metrics.evictions, 1);
        let hits = m.similar(&json!("first"));
        assert!(hits.is_empty(), "oldest record was evicted");
    }

    #[test]
    fn test_ttl_eviction() {
        let mut m = ResilientMemory::new(10, 100);
        m.add(json!({"id": "old"}), 0);
        m.add(json!({"id": "fresh"}), 150);
        assert_eq!(m.metrics().size, 1);
        assert_eq!(m.metrics().evictions, 1);
    }

    #[test]
    fn test_null_write_fails_softly() {
        let mut m = ResilientMemory::new(10, 1000);
        assert!(!m.add(Value::Null, 0));
        let metrics = m.metrics();
        assert_eq!(metrics.failures, 1);
        assert!(metrics.last_error.is_some());
        assert_eq!(metrics.size, 0);
    }

    #[test]
    fn test_similarity_single_token_overlap() {
        let mut m = ResilientMemory::new(10, u64::MAX);
        m.add(json!({"message": "missing parenthesis in console"}), 0);
        m.add(json!({"message": "null pointer dereference"}), 1);
        let hits = m.similar(&json!({"error": "parenthesis"}));
        assert_eq!(hits.len(), 1);
        assert!(hits[0].envelope_json.to_string().contains("parenthesis"));
    }

    #[test]
    fn test_similarity_caps_at_five_newest() {
        let mut m = ResilientMemory::new(20, u64::MAX);
        for i in 0..8 {
            m.add(json!({"message": "syntax error", "seq": i}), i);
        }
        let hits = m.similar(&json!("syntax"));
        assert_eq!(hits.len(), 5);
        // Newest first.
        assert_eq!(hits[0].envelope_json["seq"], json!(7));
        assert_eq!(hits[4].envelope_json["seq"], json!(3));
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let mut m = ResilientMemory::new(10, u64::MAX);
        m.add(json!({"message": "anything"}), 0);
        assert!(m.similar(&json!({})).is_empty());
    }
}
