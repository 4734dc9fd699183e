//! In-memory answer cache with a fixed TTL.
//!
//! Keyed on (user id, normalized question text) so trivial phrasing
//! differences still hit. Expired entries are treated as absent and lazily
//! evicted on the next lookup; there is no background sweeper. The cache is
//! a latency/cost optimization only - a miss never changes the answer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// A completed answer plus the metadata needed to reproduce the buffered
/// response shape on a hit.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response_text: String,
    pub sql_query: Option<String>,
    pub result_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Process-local answer cache. Construct one at service start and share it;
/// tests get isolation from fresh instances.
pub struct AnswerCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl AnswerCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_ttl(Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Case-fold and collapse whitespace so phrasing-identical questions key
    /// the same.
    fn normalize(text: &str) -> String {
        text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn key(user_id: &str, text: &str) -> String {
        format!("{}::{}", user_id, Self::normalize(text))
    }

    /// Look up a cached answer. Expired entries are removed and reported
    /// as absent.
    pub fn get(&self, user_id: &str, text: &str) -> Option<CacheEntry> {
        let key = Self::key(user_id, text);
        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(_) => return None,
        };
        let expired = match entries.get(&key) {
            Some(entry) => Utc::now() - entry.created_at >= self.ttl,
            None => return None,
        };
        if expired {
            debug!(key = %key, "Evicting expired cache entry");
            entries.remove(&key);
            return None;
        }
        entries.get(&key).cloned()
    }

    /// Store a completed answer, overwriting any previous entry wholesale.
    pub fn put(
        &self,
        user_id: &str,
        text: &str,
        response_text: &str,
        sql_query: Option<String>,
        result_count: usize,
    ) {
        let key = Self::key(user_id, text);
        let entry = CacheEntry {
            response_text: response_text.to_string(),
            sql_query,
            result_count,
            created_at: Utc::now(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, entry);
        }
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
