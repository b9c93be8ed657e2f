use std::collections::HashMap;

use anyhow::Result;

/// Full application configuration loaded from environment / .env file.
///
/// Loaded once at startup and passed down by `Arc`; nothing reads the
/// environment mid-pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub web_bind: String,
    pub web_port: u16,

    // Webhook / host API
    pub webhook_secret: String,
    pub github_token: String,
    pub github_api_url: String,
    pub git_host_url: String,

    // Git attribution
    pub git_author_name: String,
    pub git_author_email: String,

    // Queues
    pub analyze_concurrency: usize,
    pub autofix_concurrency: usize,
    pub apply_concurrency: usize,
    pub queue_max_retries: u32,
    pub queue_retry_base_ms: u64,

    // LLM router
    pub llm_provider: String,
    pub llm_strategy: String,
    pub llm_fix_mode: String,
    pub llm_timeout_ms: u64,
    pub llm_gemini_timeout_ms: u64,
    pub llm_max_patches_per_file: usize,
    pub llm_allow_multiline: bool,
    pub llm_cache_enabled: bool,
    pub llm_cache_ttl_s: u64,
    pub enable_complexity: bool,

    // Provider credentials
    pub openai_api_key: String,
    pub groq_api_key: String,
    pub deepseek_api_key: String,
    pub openrouter_api_key: String,
    pub gemini_api_key: String,

    // Preview assembly
    pub preview_time_budget_ms: u64,
    pub preview_initial_max_files: usize,
    pub preview_save_every: usize,

    // Apply / merge
    pub merge_method: String,

    // At-rest encryption of user API keys (base64, 32 bytes)
    pub encryption_key: String,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => default,
        None => default,
    }
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_usize(key: &str, dotenv: &HashMap<String, String>, default: usize) -> usize {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        Ok(Config {
            data_dir: get_str("DATA_DIR", &dotenv, "store"),
            web_bind: get_str("WEB_BIND", &dotenv, "127.0.0.1"),
            web_port: get_u16("WEB_PORT", &dotenv, 3141),

            webhook_secret: get_str("WEBHOOK_SECRET", &dotenv, ""),
            github_token: get_str("GITHUB_TOKEN", &dotenv, ""),
            github_api_url: get_str("GITHUB_API_URL", &dotenv, "https://api.github.com"),
            git_host_url: get_str("GIT_HOST_URL", &dotenv, "https://github.com"),

            git_author_name: get_str("GIT_AUTHOR_NAME", &dotenv, "peer-autofix"),
            git_author_email: get_str("GIT_AUTHOR_EMAIL", &dotenv, "autofix@peer.dev"),

            analyze_concurrency: get_usize("ANALYZE_CONCURRENCY", &dotenv, 2),
            autofix_concurrency: get_usize("AUTOFIX_CONCURRENCY", &dotenv, 4),
            apply_concurrency: get_usize("APPLY_CONCURRENCY", &dotenv, 1),
            queue_max_retries: get_u32("QUEUE_MAX_RETRIES", &dotenv, 0),
            queue_retry_base_ms: get_u64("QUEUE_RETRY_BASE_MS", &dotenv, 500),

            llm_provider: get_str("LLM_PROVIDER", &dotenv, ""),
            llm_strategy: get_str("LLM_STRATEGY", &dotenv, ""),
            llm_fix_mode: get_str("LLM_FIX_MODE", &dotenv, "auto"),
            llm_timeout_ms: get_u64("LLM_TIMEOUT_MS", &dotenv, 20_000),
            llm_gemini_timeout_ms: get_u64("LLM_GEMINI_TIMEOUT_MS", &dotenv, 30_000),
            llm_max_patches_per_file: get_usize("LLM_MAX_PATCHES_PER_FILE", &dotenv, 5),
            llm_allow_multiline: get_bool("LLM_ALLOW_MULTILINE", &dotenv, false),
            llm_cache_enabled: get_bool("LLM_CACHE_ENABLED", &dotenv, true),
            llm_cache_ttl_s: get_u64("LLM_CACHE_TTL", &dotenv, 86_400),
            enable_complexity: get_bool("PEER_ENABLE_COMPLEXITY", &dotenv, true),

            openai_api_key: get_str("OPENAI_API_KEY", &dotenv, ""),
            groq_api_key: get_str("GROQ_API_KEY", &dotenv, ""),
            deepseek_api_key: get_str("DEEPSEEK_API_KEY", &dotenv, ""),
            openrouter_api_key: get_str("OPENROUTER_API_KEY", &dotenv, ""),
            gemini_api_key: get_str("GEMINI_API_KEY", &dotenv, ""),

            preview_time_budget_ms: get_u64("PREVIEW_TIME_BUDGET_MS", &dotenv, 30_000),
            preview_initial_max_files: get_usize("PREVIEW_INITIAL_MAX_FILES", &dotenv, 30),
            preview_save_every: get_usize("PREVIEW_SAVE_EVERY", &dotenv, 5),

            merge_method: get_str("MERGE_METHOD", &dotenv, "merge"),

            encryption_key: get_str("ENCRYPTION_KEY", &dotenv, ""),
        })
    }
}
