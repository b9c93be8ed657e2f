use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use peer_core::config::Config;
use peer_core::kv::KvStore;
use peer_core::types::{Finding, User};

use crate::cache::{CacheInput, ResponseCache};
use crate::complexity::{classify, Complexity};
use crate::provider::{ChatRequest, ChatResponse, Provider};
use crate::quota;

/// Primary fallback chains. The router walks the chain in order until a
/// provider returns non-empty text; provider errors and timeouts are logged
/// and skipped, never raised.
fn chain_for(complexity: Complexity) -> [&'static str; 4] {
    match complexity {
        Complexity::Simple => ["groq", "openrouter", "gemini", "deepseek"],
        Complexity::Complex => ["deepseek", "gemini", "groq", "openrouter"],
    }
}

pub struct RouteOptions<'a> {
    /// Explicit provider choice; bypasses complexity routing but keeps the
    /// rest of the chain as fallback.
    pub provider_override: Option<&'a str>,
    /// When set, the response cache is consulted first and fed afterwards.
    pub cache_input: Option<CacheInput>,
    /// Platform user on whose budget this call runs. Their own keys, when
    /// present, override the platform credentials per provider.
    pub user: Option<&'a User>,
}

impl Default for RouteOptions<'_> {
    fn default() -> Self {
        Self {
            provider_override: None,
            cache_input: None,
            user: None,
        }
    }
}

pub struct Router {
    providers: Vec<Arc<dyn Provider>>,
    cache: ResponseCache,
    complexity_enabled: bool,
    config_override: String,
}

impl Router {
    pub fn new(providers: Vec<Arc<dyn Provider>>, kv: Arc<KvStore>, config: &Config) -> Self {
        Self {
            providers,
            cache: ResponseCache::new(
                kv,
                Duration::from_secs(config.llm_cache_ttl_s),
                config.llm_cache_enabled,
            ),
            complexity_enabled: config.enable_complexity,
            config_override: config.llm_provider.clone(),
        }
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(Arc::clone)
    }

    /// Model that would serve first for this finding set; used by callers to
    /// build cache keys and pick a fix strategy.
    pub fn primary_model(&self, findings: &[Finding], provider_override: Option<&str>) -> String {
        self.ordered(findings, provider_override)
            .first()
            .map(|p| p.model().to_string())
            .unwrap_or_default()
    }

    pub fn primary_provider_name(
        &self,
        findings: &[Finding],
        provider_override: Option<&str>,
    ) -> String {
        self.ordered(findings, provider_override)
            .first()
            .map(|p| p.name().to_string())
            .unwrap_or_default()
    }

    /// Routing is a pure function of the provider list and the finding set:
    /// explicit override first, then the complexity-selected chain, then any
    /// remaining providers.
    fn ordered(&self, findings: &[Finding], provider_override: Option<&str>) -> Vec<Arc<dyn Provider>> {
        let complexity = if self.complexity_enabled {
            classify(findings)
        } else {
            Complexity::Simple
        };

        let mut names: Vec<&str> = Vec::new();
        let explicit = provider_override
            .filter(|s| !s.is_empty())
            .or(if self.config_override.is_empty() {
                None
            } else {
                Some(self.config_override.as_str())
            });
        if let Some(name) = explicit {
            names.push(name);
        }
        for name in chain_for(complexity) {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let mut chain: Vec<Arc<dyn Provider>> = names
            .iter()
            .filter_map(|n| self.provider(n))
            .collect();
        for p in &self.providers {
            if !chain.iter().any(|c| c.name() == p.name()) {
                chain.push(Arc::clone(p));
            }
        }
        chain
    }

    /// Route a chat request. Returns `Ok(None)` when every provider in the
    /// chain failed or answered empty, and the caller degrades to
    /// deterministic-only fixing. The only hard error is quota denial.
    pub async fn call(
        &self,
        req: &ChatRequest,
        findings: &[Finding],
        opts: RouteOptions<'_>,
    ) -> Result<Option<ChatResponse>> {
        if let Some(user) = opts.user {
            let estimate = quota::estimate_tokens(&req.system) + quota::estimate_tokens(&req.user);
            quota::check(user, estimate)?;
        }

        if let Some(ref input) = opts.cache_input {
            if let Some(hit) = self.cache.get(input) {
                info!(file = %input.file, "llm cache hit");
                return Ok(Some(hit));
            }
        }

        for provider in self.ordered(findings, opts.provider_override) {
            let key_override = opts
                .user
                .and_then(|u| u.api_keys.get(provider.name()))
                .map(String::as_str);
            if !provider.has_key() && key_override.is_none() {
                continue;
            }

            match provider.call(req, key_override).await {
                Ok(response) if !response.text.trim().is_empty() => {
                    if let Some(ref input) = opts.cache_input {
                        self.cache.put(input, &response);
                    }
                    return Ok(Some(response));
                }
                Ok(_) => {
                    warn!(provider = provider.name(), "provider returned empty text, advancing");
                }
                Err(e) => {
                    warn!(provider = provider.name(), "provider failed, advancing: {e:#}");
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use peer_core::types::Severity;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockProvider {
        name: &'static str,
        replies: Mutex<Vec<Result<String, String>>>,
        calls: AtomicU32,
        last_key: Mutex<Option<String>>,
    }

    impl MockProvider {
        fn new(name: &'static str, replies: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
                last_key: Mutex::new(None),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        fn has_key(&self) -> bool {
            true
        }

        async fn call(
            &self,
            _req: &ChatRequest,
            key_override: Option<&str>,
        ) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_key.lock().unwrap() = key_override.map(str::to_string);
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.is_empty() {
                Ok("default".to_string())
            } else {
                replies.remove(0)
            };
            match reply {
                Ok(text) => Ok(ChatResponse {
                    text,
                    model: "mock-model".into(),
                    provider: self.name.to_string(),
                    response_time_ms: 1,
                }),
                Err(e) => Err(anyhow::anyhow!(e)),
            }
        }
    }

    fn test_config() -> Config {
        // Avoid process env in tests; construct via from_env then normalize the
        // fields routing depends on.
        let mut config = Config::from_env().unwrap();
        config.llm_provider = String::new();
        config.llm_cache_enabled = true;
        config.llm_cache_ttl_s = 60;
        config.enable_complexity = true;
        config
    }

    fn router_with(providers: Vec<Arc<dyn Provider>>, config: &Config) -> Router {
        Router::new(providers, Arc::new(KvStore::new()), config)
    }

    fn req() -> ChatRequest {
        ChatRequest {
            system: "sys".into(),
            user: "user".into(),
        }
    }

    fn low_finding() -> Finding {
        Finding::new("a.js", 1, "console-log", "x", "x", Severity::Low, "m")
    }

    fn critical_finding() -> Finding {
        Finding::new("a.js", 1, "sql-injection", "x", "x", Severity::Critical, "m")
    }

    #[tokio::test]
    async fn walks_simple_chain_in_order() {
        let groq = MockProvider::new("groq", vec![Err("boom".into())]);
        let openrouter = MockProvider::new("openrouter", vec![Ok("fixed".into())]);
        let gemini = MockProvider::new("gemini", vec![]);
        let config = test_config();
        let router = router_with(
            vec![groq.clone(), openrouter.clone(), gemini.clone()],
            &config,
        );

        let out = router
            .call(&req(), &[low_finding()], RouteOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.provider, "openrouter");
        assert_eq!(groq.calls(), 1);
        assert_eq!(openrouter.calls(), 1);
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test]
    async fn complex_findings_prefer_deepseek() {
        let groq = MockProvider::new("groq", vec![]);
        let deepseek = MockProvider::new("deepseek", vec![Ok("fixed".into())]);
        let config = test_config();
        let router = router_with(vec![groq.clone(), deepseek.clone()], &config);

        let out = router
            .call(&req(), &[critical_finding()], RouteOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.provider, "deepseek");
        assert_eq!(groq.calls(), 0);
    }

    #[tokio::test]
    async fn explicit_override_goes_first() {
        let groq = MockProvider::new("groq", vec![]);
        let openai = MockProvider::new("openai", vec![Ok("fixed".into())]);
        let config = test_config();
        let router = router_with(vec![groq.clone(), openai.clone()], &config);

        let out = router
            .call(
                &req(),
                &[low_finding()],
                RouteOptions {
                    provider_override: Some("openai"),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.provider, "openai");
        assert_eq!(groq.calls(), 0);
    }

    #[tokio::test]
    async fn exhaustion_yields_none() {
        let groq = MockProvider::new("groq", vec![Err("a".into())]);
        let openrouter = MockProvider::new("openrouter", vec![Ok(String::new())]);
        let config = test_config();
        let router = router_with(vec![groq, openrouter], &config);

        let out = router
            .call(&req(), &[low_finding()], RouteOptions::default())
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn cache_hit_skips_provider() {
        let groq = MockProvider::new("groq", vec![Ok("fixed".into())]);
        let config = test_config();
        let router = router_with(vec![groq.clone()], &config);

        let input = CacheInput::new("a.js", "code", &[low_finding()], "mock-model");
        let opts = || RouteOptions {
            cache_input: Some(input.clone()),
            ..Default::default()
        };

        let first = router
            .call(&req(), &[low_finding()], opts())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.provider, "groq");

        let second = router
            .call(&req(), &[low_finding()], opts())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.provider, "cache");
        assert_eq!(second.text, "fixed");
        assert_eq!(second.response_time_ms, 0);
        // Provider HTTP was invoked exactly once across both calls.
        assert_eq!(groq.calls(), 1);
    }

    #[tokio::test]
    async fn quota_denial_is_a_hard_error() {
        let groq = MockProvider::new("groq", vec![]);
        let config = test_config();
        let router = router_with(vec![groq.clone()], &config);

        let user = User {
            id: "u1".into(),
            token_limit: 1,
            tokens_used: 1,
            purchased_tokens: 0,
            api_keys: HashMap::new(),
        };
        let err = router
            .call(
                &req(),
                &[low_finding()],
                RouteOptions {
                    user: Some(&user),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<crate::QuotaExceeded>().is_some());
        assert_eq!(groq.calls(), 0);
    }

    #[tokio::test]
    async fn user_keys_override_platform_key() {
        let groq = MockProvider::new("groq", vec![Ok("fixed".into())]);
        let config = test_config();
        let router = router_with(vec![groq.clone()], &config);

        let mut user = User {
            id: "u1".into(),
            token_limit: -1,
            tokens_used: 0,
            purchased_tokens: 0,
            api_keys: HashMap::new(),
        };
        user.api_keys.insert("groq".into(), "gsk-own".into());

        router
            .call(
                &req(),
                &[low_finding()],
                RouteOptions {
                    user: Some(&user),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(groq.last_key.lock().unwrap().as_deref(), Some("gsk-own"));
    }
}
