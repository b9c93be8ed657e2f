use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use peer_core::types::{Finding, Severity};
use peer_llm::{strip_code_fences, ChatRequest, RouteOptions, Router};

use crate::{extension, read_text, Analyzer};

const MAX_FILES: usize = 8;
const MAX_LINES_PER_FILE: usize = 400;

const SYSTEM_PROMPT: &str = "You are a strict code reviewer. You receive changed files from a \
pull request and report concrete issues: bugs, security problems, bad error handling, \
performance traps. Respond with ONLY a JSON array, no prose, where each element is \
{\"file\": string, \"line\": number, \"rule\": string, \"severity\": \
\"critical\"|\"high\"|\"medium\"|\"low\", \"message\": string, \"suggestion\": string}. \
Use short kebab-case rule names. Report nothing when the code is fine.";

/// LLM-backed analyzer. Sends changed-file excerpts through the provider
/// router and parses the returned JSON findings. Any failure (routing,
/// parsing, nonsense output) degrades to zero findings.
pub struct AiAnalyzer {
    router: Arc<Router>,
}

#[derive(Deserialize)]
struct AiFinding {
    #[serde(default)]
    file: String,
    #[serde(default = "default_line")]
    line: u32,
    #[serde(default)]
    rule: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    suggestion: String,
}

fn default_line() -> u32 {
    1
}

impl AiAnalyzer {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    fn build_prompt(workdir: &Path, files: &[String]) -> Option<String> {
        let mut sections = Vec::new();
        for file in files.iter().take(MAX_FILES) {
            if !is_reviewable(file) {
                continue;
            }
            let Some(text) = read_text(workdir, file) else {
                continue;
            };
            let numbered: String = text
                .lines()
                .take(MAX_LINES_PER_FILE)
                .enumerate()
                .map(|(i, l)| format!("{:>4} | {l}\n", i + 1))
                .collect();
            sections.push(format!("=== {file} ===\n{numbered}"));
        }
        if sections.is_empty() {
            None
        } else {
            Some(format!(
                "Review the following changed files and report issues as JSON.\n\n{}",
                sections.join("\n")
            ))
        }
    }

    fn parse(files: &[String], text: &str) -> Vec<Finding> {
        let body = strip_code_fences(text);
        let parsed: Vec<AiFinding> = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("ai analyzer returned unparseable json: {e}");
                return Vec::new();
            }
        };

        parsed
            .into_iter()
            .filter(|f| !f.rule.is_empty() && !f.message.is_empty())
            // Only accept findings for files that were actually sent.
            .filter(|f| files.iter().any(|known| known == &f.file))
            .map(|f| {
                Finding::new(
                    f.file,
                    f.line,
                    &format!("ai:{}", f.rule),
                    "ai",
                    "ai",
                    Severity::from_str(&f.severity),
                    &f.message,
                )
                .with_suggestion(&f.suggestion)
                .with_category("ai-review")
            })
            .collect()
    }
}

fn is_reviewable(file: &str) -> bool {
    matches!(
        extension(file),
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "py" | "rb" | "go" | "rs" | "java" | "php"
    )
}

#[async_trait]
impl Analyzer for AiAnalyzer {
    fn name(&self) -> &'static str {
        "ai"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let Some(user) = Self::build_prompt(workdir, files) else {
            return Ok(Vec::new());
        };
        let req = ChatRequest {
            system: SYSTEM_PROMPT.to_string(),
            user,
        };

        match self.router.call(&req, &[], RouteOptions::default()).await {
            Ok(Some(response)) => Ok(Self::parse(files, &response.text)),
            Ok(None) => {
                warn!("ai analyzer: provider chain exhausted, no ai findings");
                Ok(Vec::new())
            }
            Err(e) => {
                warn!("ai analyzer routing failed: {e:#}");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_files_only() {
        let files = vec!["src/app.js".to_string()];
        let text = r#"[
            {"file":"src/app.js","line":3,"rule":"n-plus-one","severity":"high","message":"query in loop","suggestion":"batch it"},
            {"file":"made/up.js","line":1,"rule":"x","severity":"low","message":"y","suggestion":""}
        ]"#;
        let findings = AiAnalyzer::parse(&files, text);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, "ai:n-plus-one");
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn parse_garbage_yields_nothing() {
        assert!(AiAnalyzer::parse(&[], "I think this code is great!").is_empty());
    }

    #[test]
    fn unknown_severity_defaults_to_medium() {
        let files = vec!["a.py".to_string()];
        let text = r#"[{"file":"a.py","line":1,"rule":"r","severity":"weird","message":"m","suggestion":""}]"#;
        let findings = AiAnalyzer::parse(&files, text);
        assert_eq!(findings[0].severity, Severity::Medium);
    }
}
