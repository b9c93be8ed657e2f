use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared in-memory K/V store with per-entry TTL.
///
/// Backs both job-queue persistence (`queue:<name>:<id>`) and the LLM
/// response cache (`llm:cache:<sha256>`). Writes are last-writer-wins;
/// cache keys are content-addressed so collisions are benign.
pub struct KvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(e) if e.expires_at.is_some_and(|t| Instant::now() >= t) => {
                entries.remove(key);
                None
            }
            Some(e) => Some(e.value.clone()),
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.insert(key, value, None);
    }

    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        self.insert(key, value, Some(Instant::now() + ttl));
    }

    fn insert(&self, key: &str, value: &str, expires_at: Option<Instant>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.expires_at.is_some_and(|t| now >= t))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop expired entries. Called periodically from a background task.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| !e.expires_at.is_some_and(|t| now >= t));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let kv = KvStore::new();
        kv.set("a", "1");
        assert_eq!(kv.get("a").as_deref(), Some("1"));
        kv.remove("a");
        assert_eq!(kv.get("a"), None);
    }

    #[test]
    fn ttl_expiry() {
        let kv = KvStore::new();
        kv.set_with_ttl("a", "1", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(kv.get("a"), None);
    }

    #[test]
    fn last_writer_wins() {
        let kv = KvStore::new();
        kv.set("a", "1");
        kv.set("a", "2");
        assert_eq!(kv.get("a").as_deref(), Some("2"));
    }

    #[test]
    fn prefix_scan_and_sweep() {
        let kv = KvStore::new();
        kv.set("queue:analyze:1", "{}");
        kv.set("queue:analyze:2", "{}");
        kv.set("llm:cache:x", "{}");
        assert_eq!(kv.keys_with_prefix("queue:analyze:").len(), 2);

        kv.set_with_ttl("gone", "x", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(kv.sweep(), 1);
        assert_eq!(kv.len(), 3);
    }
}
