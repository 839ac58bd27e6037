use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const CACHE_CAP: usize = 128;

#[derive(Clone, Debug)]
pub struct CachedOutcome {
    pub text: String,
    pub metadata: serde_json::Value,
}

struct CacheEntry {
    outcome: CachedOutcome,
    inserted: Instant,
}

/// Bounded TTL cache for workflow results. Purely an optimization; the
/// config switch turns it off wholesale.
pub struct WorkflowCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for WorkflowCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Key over the workflow name, its normalized parameters, and a
    /// fingerprint of the content the workflow read.
    pub fn key(workflow: &str, params: &serde_json::Value, fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(workflow.as_bytes());
        hasher.update(b"\0");
        hasher.update(params.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(fingerprint.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<CachedOutcome> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < CACHE_TTL => Some(entry.outcome.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, outcome: CachedOutcome) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.inserted.elapsed() < CACHE_TTL);
        if entries.len() >= CACHE_CAP {
            // Evict the oldest entry to stay bounded.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                outcome,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_stable_and_content_sensitive() {
        let params = json!({"files": ["a.rs"], "focus": "security"});
        let key_one = WorkflowCache::key("parallel-review", &params, "abc");
        let key_two = WorkflowCache::key("parallel-review", &params, "abc");
        assert_eq!(key_one, key_two);

        let other_content = WorkflowCache::key("parallel-review", &params, "abd");
        assert_ne!(key_one, other_content);

        let other_workflow = WorkflowCache::key("bug-hunt", &params, "abc");
        assert_ne!(key_one, other_workflow);
    }

    #[test]
    fn hit_then_eviction_at_cap() {
        let cache = WorkflowCache::new();
        cache.put(
            "k1".to_string(),
            CachedOutcome {
                text: "cached".to_string(),
                metadata: json!({}),
            },
        );
        assert_eq!(cache.get("k1").unwrap().text, "cached");
        assert!(cache.get("k2").is_none());

        for index in 0..CACHE_CAP + 10 {
            cache.put(
                format!("fill-{index}"),
                CachedOutcome {
                    text: String::new(),
                    metadata: json!({}),
                },
            );
        }
        assert!(cache.entries.lock().len() <= CACHE_CAP + 1);
    }
}
