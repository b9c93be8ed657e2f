use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use peer_core::config::Config;

/// One chat-completion exchange.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub model: String,
    pub provider: String,
    pub response_time_ms: u64,
}

/// A single LLM backend. Implementations read their key at construction
/// (environment via [`Config`]) and accept a per-request override from the
/// user's own keys. Errors and timeouts are returned as `Err`; the router
/// treats both identically and advances the fallback chain.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn has_key(&self) -> bool;
    async fn call(&self, req: &ChatRequest, key_override: Option<&str>) -> Result<ChatResponse>;
}

// ── OpenAI-compatible backends ────────────────────────────────────────────

/// Chat-completions provider for the OpenAI-compatible backends
/// (openai, groq, deepseek, openrouter: same envelope, different hosts).
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: &str,
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn call(&self, req: &ChatRequest, key_override: Option<&str>) -> Result<ChatResponse> {
        let key = key_override.unwrap_or(&self.api_key);
        if key.is_empty() {
            return Err(anyhow!("{}: no api key configured", self.name));
        }

        let mut messages = Vec::new();
        if !req.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &req.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &req.user,
        });
        let body = ChatCompletionBody {
            model: &self.model,
            messages,
            temperature: 0.2,
            max_tokens: 4096,
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build llm client")?;

        let started = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let response = client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{}: request failed", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {status}: {text}", self.name));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .with_context(|| format!("{}: decode response", self.name))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let elapsed = started.elapsed().as_millis() as u64;
        info!(provider = %self.name, model = %self.model, response_time_ms = elapsed, "llm call complete");
        Ok(ChatResponse {
            text,
            model: self.model.clone(),
            provider: self.name.clone(),
            response_time_ms: elapsed,
        })
    }
}

// ── Gemini ────────────────────────────────────────────────────────────────

/// Gemini uses a different envelope and passes the key as a URL query
/// parameter instead of a bearer header.
pub struct GeminiProvider {
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
    pub fn new(model: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn has_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn call(&self, req: &ChatRequest, key_override: Option<&str>) -> Result<ChatResponse> {
        let key = key_override.unwrap_or(&self.api_key);
        if key.is_empty() {
            return Err(anyhow!("gemini: no api key configured"));
        }

        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": req.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": req.user }] }],
            "generationConfig": { "temperature": 0.2, "maxOutputTokens": 4096 },
        });

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build llm client")?;

        let started = Instant::now();
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, key
        );
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("gemini: request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("gemini returned {status}: {text}"));
        }

        let parsed: GeminiResponse = response.json().await.context("gemini: decode response")?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();

        let elapsed = started.elapsed().as_millis() as u64;
        info!(provider = "gemini", model = %self.model, response_time_ms = elapsed, "llm call complete");
        Ok(ChatResponse {
            text,
            model: self.model.clone(),
            provider: "gemini".to_string(),
            response_time_ms: elapsed,
        })
    }
}

// ── Construction ──────────────────────────────────────────────────────────

/// The ordered provider list. Order is part of the routing contract:
/// openai, groq, deepseek, openrouter, gemini.
pub fn default_providers(config: &Config) -> Vec<std::sync::Arc<dyn Provider>> {
    let timeout = Duration::from_millis(config.llm_timeout_ms);
    let gemini_timeout = Duration::from_millis(config.llm_gemini_timeout_ms);
    vec![
        std::sync::Arc::new(OpenAiCompatProvider::new(
            "openai",
            "https://api.openai.com/v1",
            "gpt-4o-mini",
            &config.openai_api_key,
            timeout,
        )),
        std::sync::Arc::new(OpenAiCompatProvider::new(
            "groq",
            "https://api.groq.com/openai/v1",
            "llama-3.3-70b-versatile",
            &config.groq_api_key,
            timeout,
        )),
        std::sync::Arc::new(OpenAiCompatProvider::new(
            "deepseek",
            "https://api.deepseek.com/v1",
            "deepseek-chat",
            &config.deepseek_api_key,
            timeout,
        )),
        std::sync::Arc::new(OpenAiCompatProvider::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            "meta-llama/llama-3.3-70b-instruct",
            &config.openrouter_api_key,
            timeout,
        )),
        std::sync::Arc::new(GeminiProvider::new(
            "gemini-2.0-flash",
            &config.gemini_api_key,
            gemini_timeout,
        )),
    ]
}
