use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use peer_core::types::{Finding, Severity};

use crate::rules::{re, scan_lines, LineRule};
use crate::{extension, read_text, Analyzer};

/// Shell script pattern matcher.
pub struct Shell {
    rules: Vec<LineRule>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        let rules = vec![
            LineRule {
                rule: "curl-pipe-shell",
                re: re(r"(curl|wget)[^|]*\|\s*(ba|z)?sh\b"),
                unless: None,
                severity: Severity::Critical,
                message: "Remote script piped straight into a shell",
                suggestion: "Download, inspect, and checksum the script before executing",
                category: "security",
                cwe: &["CWE-494"],
            },
            LineRule {
                rule: "rm-rf-variable",
                re: re(r#"rm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r)\s+("?\$|\*)"#),
                unless: None,
                severity: Severity::High,
                message: "Recursive delete of a variable or glob path",
                suggestion: "Validate the path and quote the variable",
                category: "reliability",
                cwe: &[],
            },
            LineRule {
                rule: "shell-eval-variable",
                re: re(r#"\beval\s+"?\$"#),
                unless: None,
                severity: Severity::High,
                message: "eval over a variable executes attacker-controllable text",
                suggestion: "Use arrays or explicit command dispatch",
                category: "injection",
                cwe: &["CWE-78"],
            },
        ];
        Self { rules }
    }
}

#[async_trait]
impl Analyzer for Shell {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files {
            if !matches!(extension(file), "sh" | "bash") {
                continue;
            }
            let Some(text) = read_text(workdir, file) else {
                continue;
            };
            findings.extend(scan_lines(file, &text, &self.rules, "shell", "shell", Some("shell")));
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
        std::fs::write(dir.path().join("deploy.sh"), contents).unwrap();
        Shell::new()
            .analyze(dir.path(), &["deploy.sh".into()])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn detects_curl_pipe_sh() {
        let findings = run("curl -fsSL https://example.com/install | sh\n").await;
        assert!(findings.iter().any(|f| f.rule == "curl-pipe-shell"));
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn detects_rm_rf_variable() {
        let findings = run("rm -rf $BUILD_DIR\n").await;
        assert!(findings.iter().any(|f| f.rule == "rm-rf-variable"));
    }

    #[tokio::test]
    async fn plain_rm_with_literal_path_is_clean() {
        let findings = run("rm -rf ./target\n").await;
        assert!(findings.iter().all(|f| f.rule != "rm-rf-variable"));
    }

    #[tokio::test]
    async fn detects_shell_eval() {
        let findings = run("eval \"$USER_CMD\"\n").await;
        assert!(findings.iter().any(|f| f.rule == "shell-eval-variable"));
    }
}
