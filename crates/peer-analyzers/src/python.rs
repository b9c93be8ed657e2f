use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use peer_core::types::{Finding, Severity};

use crate::rules::{re, scan_lines, LineRule};
use crate::{extension, read_text, Analyzer};

/// Python pattern matcher.
pub struct Python {
    rules: Vec<LineRule>,
}

impl Default for Python {
    fn default() -> Self {
        Self::new()
    }
}

impl Python {
    pub fn new() -> Self {
        let rules = vec![
            LineRule {
                rule: "bare-except",
                re: re(r"^\s*except\s*:"),
                unless: None,
                severity: Severity::Medium,
                message: "Bare except catches SystemExit and KeyboardInterrupt",
                suggestion: "Catch a specific exception type",
                category: "reliability",
                cwe: &["CWE-396"],
            },
            LineRule {
                rule: "mutable-default-arg",
                re: re(r"def\s+\w+\s*\([^)]*=\s*(\[\]|\{\})"),
                unless: None,
                severity: Severity::Medium,
                message: "Mutable default argument is shared across calls",
                suggestion: "Default to None and create the value inside the function",
                category: "logic-bug",
                cwe: &[],
            },
            LineRule {
                rule: "yaml-unsafe-load",
                re: re(r"\byaml\.load\s*\("),
                unless: Some(re(r"Loader\s*=")),
                severity: Severity::High,
                message: "yaml.load without a safe loader can execute arbitrary objects",
                suggestion: "Use yaml.safe_load",
                category: "security",
                cwe: &["CWE-502"],
            },
            LineRule {
                rule: "subprocess-shell-true",
                re: re(r"\bshell\s*=\s*True\b"),
                unless: None,
                severity: Severity::High,
                message: "shell=True passes the command through a shell",
                suggestion: "Pass an argument list with shell=False",
                category: "injection",
                cwe: &["CWE-78"],
            },
        ];
        Self { rules }
    }
}

#[async_trait]
impl Analyzer for Python {
    fn name(&self) -> &'static str {
        "python"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files {
            if extension(file) != "py" {
                continue;
            }
            let Some(text) = read_text(workdir, file) else {
                continue;
            };
            findings.extend(scan_lines(
                file,
                &text,
                &self.rules,
                "python",
                "python",
                Some("python"),
            ));
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
        std::fs::write(dir.path().join("app.py"), contents).unwrap();
        Python::new()
            .analyze(dir.path(), &["app.py".into()])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn detects_unsafe_yaml_load() {
        let findings = run("data = yaml.load(f)\n").await;
        assert!(findings.iter().any(|f| f.rule == "yaml-unsafe-load"));
    }

    #[tokio::test]
    async fn explicit_loader_is_clean() {
        let findings = run("data = yaml.load(f, Loader=yaml.SafeLoader)\n").await;
        assert!(findings.iter().all(|f| f.rule != "yaml-unsafe-load"));
    }

    #[tokio::test]
    async fn detects_bare_except_and_shell_true() {
        let findings = run("try:\n    pass\nexcept:\n    pass\nsubprocess.run(cmd, shell=True)\n").await;
        assert!(findings.iter().any(|f| f.rule == "bare-except" && f.line == 3));
        assert!(findings.iter().any(|f| f.rule == "subprocess-shell-true" && f.line == 5));
    }

    #[tokio::test]
    async fn detects_mutable_default() {
        let findings = run("def add(item, items=[]):\n    items.append(item)\n").await;
        assert!(findings.iter().any(|f| f.rule == "mutable-default-arg"));
    }
}
