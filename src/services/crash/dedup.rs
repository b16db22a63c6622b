//! Crash-analysis dedup cache.
//!
//! Keyed by `(user_id, md5-of-normalized-log)`, TTL one hour, capacity
//! bounded. The cached value is the serialized response, so a repeat of the
//! same log inside the window returns byte-identical suggestions without
//! touching the model.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::utils::text::collapse_whitespace;

struct CachedAnalysis {
    response_json: String,
    inserted_at: Instant,
}

pub struct DedupCache {
    entries: DashMap<(String, String), CachedAnalysis>,
    ttl: Duration,
    capacity: usize,
}

impl DedupCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { entries: DashMap::new(), ttl, capacity: capacity.max(1) }
    }

    /// MD5 fingerprint of the lowercased, whitespace-collapsed log.
    pub fn fingerprint(raw_log: &str) -> String {
        let normalized = collapse_whitespace(&raw_log.to_lowercase());
        format!("{:x}", md5::compute(normalized.as_bytes()))
    }

    pub fn get(&self, user_id: &str, log_md5: &str) -> Option<String> {
        let key = (user_id.to_string(), log_md5.to_string());

        if let Some(entry) = self.entries.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.response_json.clone());
            }
        } else {
            return None;
        }

        // expired
        self.entries.remove(&key);
        None
    }

    pub fn insert(&self, user_id: &str, log_md5: &str, response_json: String) {
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            (user_id.to_string(), log_md5.to_string()),
            CachedAnalysis { response_json, inserted_at: Instant::now() },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
