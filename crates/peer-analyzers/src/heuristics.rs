use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use peer_core::types::{Finding, Severity};

use crate::rules::{re, scan_lines, LineRule};
use crate::{extension, read_text, Analyzer};

const CODE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "rb", "go", "rs", "java", "kt", "php", "cs",
    "c", "cc", "cpp", "h", "hpp", "swift", "scala", "sh",
];

const MAX_LINE_LEN: usize = 200;

/// Cross-language line heuristics: credentials in source, plaintext HTTP,
/// eval, swallowed exceptions, string-built SQL.
pub struct Heuristics {
    rules: Vec<LineRule>,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self::new()
    }
}

impl Heuristics {
    pub fn new() -> Self {
        let rules = vec![
            LineRule {
                rule: "hardcoded-secret",
                re: re(r#"(?i)\b(api[_-]?key|apikey|secret|password|passwd|token)\s*[:=]\s*["'][A-Za-z0-9_\-/+]{8,}["']"#),
                unless: Some(re(r"(?i)(process\.env|os\.environ|getenv|example|placeholder|changeme|xxx)")),
                severity: Severity::Critical,
                message: "Credential appears to be hardcoded in source",
                suggestion: "Move the value to an environment variable or a secret manager",
                category: "security",
                cwe: &["CWE-798"],
            },
            LineRule {
                rule: "http-not-https",
                re: re(r#"["']http://"#),
                unless: Some(re(r"(localhost|127\.0\.0\.1|0\.0\.0\.0|\.local\b|schemas?\.|w3\.org)")),
                severity: Severity::Medium,
                message: "Plaintext HTTP URL; traffic can be intercepted",
                suggestion: "Use https:// for all external endpoints",
                category: "security",
                cwe: &["CWE-319"],
            },
            LineRule {
                rule: "eval-usage",
                re: re(r"\beval\s*\("),
                unless: None,
                severity: Severity::High,
                message: "eval() executes arbitrary code",
                suggestion: "Parse the input explicitly instead of evaluating it",
                category: "security",
                cwe: &["CWE-95"],
            },
            LineRule {
                rule: "empty-catch",
                re: re(r"catch\s*(\([^)]*\))?\s*\{\s*\}"),
                unless: None,
                severity: Severity::Low,
                message: "Exception swallowed by an empty catch block",
                suggestion: "Log the error or rethrow it",
                category: "reliability",
                cwe: &[],
            },
            LineRule {
                rule: "sql-string-concat",
                re: re(r#"(?i)["'](SELECT|INSERT|UPDATE|DELETE)\b[^"']*["']\s*\+"#),
                unless: None,
                severity: Severity::High,
                message: "SQL statement built by string concatenation",
                suggestion: "Use parameterized queries",
                category: "injection",
                cwe: &["CWE-89"],
            },
        ];
        Self { rules }
    }
}

#[async_trait]
impl Analyzer for Heuristics {
    fn name(&self) -> &'static str {
        "heuristics"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files {
            if !CODE_EXTENSIONS.contains(&extension(file)) {
                continue;
            }
            let Some(text) = read_text(workdir, file) else {
                continue;
            };
            findings.extend(scan_lines(file, &text, &self.rules, "heuristics", "heuristics", None));

            for (idx, line) in text.lines().enumerate() {
                if line.chars().count() > MAX_LINE_LEN {
                    findings.push(
                        Finding::new(
                            file,
                            (idx + 1) as u32,
                            "long-line",
                            "heuristics",
                            "heuristics",
                            Severity::Low,
                            "Line exceeds 200 characters",
                        )
                        .with_suggestion("Break the expression up for readability")
                        .with_category("style"),
                    );
                }
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn run(contents: &str) -> Vec<Finding> {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.js"), contents).unwrap();
        Heuristics::new()
            .analyze(dir.path(), &["app.js".into()])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn detects_hardcoded_secret() {
        let findings = run("const apiKey = \"sk_live_abcdef123456\"\n").await;
        assert!(findings.iter().any(|f| f.rule == "hardcoded-secret"));
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn env_lookup_is_not_a_secret() {
        let findings = run("const apiKey = process.env.API_KEY\n").await;
        assert!(findings.iter().all(|f| f.rule != "hardcoded-secret"));
    }

    #[tokio::test]
    async fn detects_plain_http_but_not_localhost() {
        let findings = run("axios.get('http://api.example.com')\nfetch('http://localhost:3000')\n").await;
        let http: Vec<_> = findings.iter().filter(|f| f.rule == "http-not-https").collect();
        assert_eq!(http.len(), 1);
        assert_eq!(http[0].line, 1);
    }

    #[tokio::test]
    async fn skips_unreadable_and_non_code_files() {
        let dir = TempDir::new().unwrap();
        let findings = Heuristics::new()
            .analyze(dir.path(), &["missing.js".into(), "README.md".into()])
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn flags_long_lines() {
        let findings = run(&format!("const x = \"{}\"\n", "a".repeat(300))).await;
        assert!(findings.iter().any(|f| f.rule == "long-line"));
    }
}
