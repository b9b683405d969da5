//! In-process hot cache of serialized responses.
//!
//! Entries expire after a fixed TTL, checked on read. A light sweep runs
//! when the map grows past a threshold so abandoned keys cannot accumulate
//! without bound.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const SWEEP_THRESHOLD: usize = 16_384;

struct Entry {
    value: String,
    stored_at: Instant,
}

/// TTL-bounded map of serialized responses, keyed `ip:<ip>`.
pub struct HotCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl HotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached value when present and unexpired.
    pub fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let entry = entries.get(key)?;
            if entry.stored_at.elapsed() <= self.ttl {
                return Some(entry.value.clone());
            }
        }
        // Expired: drop the stale entry before reporting a miss
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(key) {
            if entry.stored_at.elapsed() > self.ttl {
                entries.remove(key);
            }
        }
        None
    }

    /// Stores a value, refreshing its TTL.
    pub fn set(&self, key: &str, value: String) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= SWEEP_THRESHOLD {
            let ttl = self.ttl;
            entries.retain(|_, e| e.stored_at.elapsed() <= ttl);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    fn backdate(&self, key: &str, age: Duration) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.stored_at = Instant::now() - age;
        }
    }
}
