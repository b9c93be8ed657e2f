use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use peer_core::kv::KvStore;
use peer_core::types::Finding;

use crate::provider::ChatResponse;

/// Inputs that address a cached rewrite: the file path, its exact content,
/// the findings being fixed, and the model asked for.
#[derive(Debug, Clone)]
pub struct CacheInput {
    pub file: String,
    pub content: String,
    pub findings_key: String,
    pub model: String,
}

impl CacheInput {
    pub fn new(file: &str, content: &str, findings: &[Finding], model: &str) -> Self {
        Self {
            file: file.to_string(),
            content: content.to_string(),
            findings_key: normalize_findings(findings),
            model: model.to_string(),
        }
    }
}

/// Normalized finding set: `rule@line`, sorted, so ordering differences in
/// the input do not defeat the cache.
fn normalize_findings(findings: &[Finding]) -> String {
    let mut keys: Vec<String> = findings
        .iter()
        .map(|f| format!("{}@{}", f.rule, f.line))
        .collect();
    keys.sort();
    keys.join(";")
}

pub fn cache_key(input: &CacheInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.file.as_bytes());
    hasher.update([0]);
    hasher.update(input.content.as_bytes());
    hasher.update([0]);
    hasher.update(input.findings_key.as_bytes());
    hasher.update([0]);
    hasher.update(input.model.as_bytes());
    format!("llm:cache:{}", hex::encode(hasher.finalize()))
}

pub struct ResponseCache {
    kv: Arc<KvStore>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(kv: Arc<KvStore>, ttl: Duration, enabled: bool) -> Self {
        Self { kv, ttl, enabled }
    }

    /// A hit is returned with the synthetic `provider="cache"` and a zero
    /// response time.
    pub fn get(&self, input: &CacheInput) -> Option<ChatResponse> {
        if !self.enabled {
            return None;
        }
        let raw = self.kv.get(&cache_key(input))?;
        let mut cached: ChatResponse = serde_json::from_str(&raw).ok()?;
        cached.provider = "cache".to_string();
        cached.response_time_ms = 0;
        Some(cached)
    }

    pub fn put(&self, input: &CacheInput, response: &ChatResponse) {
        if !self.enabled || response.text.is_empty() {
            return;
        }
        if let Ok(json) = serde_json::to_string(response) {
            self.kv.set_with_ttl(&cache_key(input), &json, self.ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_core::types::Severity;

    fn finding(rule: &str, line: u32) -> Finding {
        Finding::new("a.js", line, rule, "x", "x", Severity::Low, "m")
    }

    fn response(text: &str) -> ChatResponse {
        ChatResponse {
            text: text.into(),
            model: "m1".into(),
            provider: "groq".into(),
            response_time_ms: 120,
        }
    }

    #[test]
    fn key_is_order_insensitive_over_findings() {
        let a = CacheInput::new("a.js", "code", &[finding("r1", 1), finding("r2", 2)], "m1");
        let b = CacheInput::new("a.js", "code", &[finding("r2", 2), finding("r1", 1)], "m1");
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn key_varies_with_content_and_model() {
        let a = CacheInput::new("a.js", "code", &[], "m1");
        let b = CacheInput::new("a.js", "code2", &[], "m1");
        let c = CacheInput::new("a.js", "code", &[], "m2");
        assert_ne!(cache_key(&a), cache_key(&b));
        assert_ne!(cache_key(&a), cache_key(&c));
    }

    #[test]
    fn hit_reports_cache_provider() {
        let cache = ResponseCache::new(
            Arc::new(KvStore::new()),
            Duration::from_secs(60),
            true,
        );
        let input = CacheInput::new("a.js", "code", &[], "m1");
        assert!(cache.get(&input).is_none());
        cache.put(&input, &response("fixed"));

        let hit = cache.get(&input).unwrap();
        assert_eq!(hit.text, "fixed");
        assert_eq!(hit.provider, "cache");
        assert_eq!(hit.response_time_ms, 0);
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = ResponseCache::new(
            Arc::new(KvStore::new()),
            Duration::from_secs(60),
            false,
        );
        let input = CacheInput::new("a.js", "code", &[], "m1");
        cache.put(&input, &response("fixed"));
        assert!(cache.get(&input).is_none());
    }

    #[test]
    fn empty_text_is_not_cached() {
        let cache = ResponseCache::new(
            Arc::new(KvStore::new()),
            Duration::from_secs(60),
            true,
        );
        let input = CacheInput::new("a.js", "code", &[], "m1");
        cache.put(&input, &response(""));
        assert!(cache.get(&input).is_none());
    }
}
