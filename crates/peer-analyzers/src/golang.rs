use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use peer_core::types::{Finding, Severity};

use crate::rules::{re, scan_lines, LineRule};
use crate::{extension, read_text, Analyzer};

/// Go pattern matcher.
pub struct Golang {
    rules: Vec<LineRule>,
}

impl Default for Golang {
    fn default() -> Self {
        Self::new()
    }
}

impl Golang {
    pub fn new() -> Self {
        let rules = vec![
            LineRule {
                rule: "panic-call",
                re: re(r"\bpanic\s*\("),
                unless: None,
                severity: Severity::Medium,
                message: "panic unwinds the whole goroutine",
                suggestion: "Return an error instead",
                category: "reliability",
                cwe: &[],
            },
            LineRule {
                rule: "fmt-println-debug",
                re: re(r"\bfmt\.Println\s*\("),
                unless: None,
                severity: Severity::Low,
                message: "Debug printing left in source",
                suggestion: "Use the project's logger",
                category: "style",
                cwe: &[],
            },
            LineRule {
                rule: "exec-through-shell",
                re: re(r#"exec\.Command\(\s*"(sh|bash)""#),
                unless: None,
                severity: Severity::High,
                message: "Command built through a shell invites injection",
                suggestion: "Invoke the target binary directly with an argument list",
                category: "injection",
                cwe: &["CWE-78"],
            },
            LineRule {
                rule: "insecure-skip-verify",
                re: re(r"InsecureSkipVerify:\s*true"),
                unless: None,
                severity: Severity::High,
                message: "TLS certificate verification disabled",
                suggestion: "Remove InsecureSkipVerify or scope it to tests",
                category: "security",
                cwe: &["CWE-295"],
            },
            LineRule {
                rule: "discarded-error",
                re: re(r"^\s*_\s*(,\s*_\s*)*=\s*\w"),
                unless: None,
                severity: Severity::Low,
                message: "Return value (likely an error) discarded",
                suggestion: "Handle or log the error",
                category: "reliability",
                cwe: &["CWE-252"],
            },
        ];
        Self { rules }
    }
}

#[async_trait]
impl Analyzer for Golang {
    fn name(&self) -> &'static str {
        "golang"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files {
            if extension(file) != "go" {
                continue;
            }
            let Some(text) = read_text(workdir, file) else {
                continue;
            };
            findings.extend(scan_lines(file, &text, &self.rules, "golang", "golang", Some("go")));
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
        std::fs::write(dir.path().join("main.go"), contents).unwrap();
        Golang::new()
            .analyze(dir.path(), &["main.go".into()])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn detects_insecure_tls_and_shell_exec() {
        let findings = run(
            "cfg := &tls.Config{InsecureSkipVerify: true}\ncmd := exec.Command(\"sh\", \"-c\", userInput)\n",
        )
        .await;
        assert!(findings.iter().any(|f| f.rule == "insecure-skip-verify" && f.line == 1));
        assert!(findings.iter().any(|f| f.rule == "exec-through-shell" && f.line == 2));
    }

    #[tokio::test]
    async fn detects_discarded_error() {
        let findings = run("_ = db.Close()\n").await;
        assert!(findings.iter().any(|f| f.rule == "discarded-error"));
    }

    #[tokio::test]
    async fn only_go_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), "panic(\"x\")\n").unwrap();
        let findings = Golang::new()
            .analyze(dir.path(), &["main.rs".into()])
            .await
            .unwrap();
        assert!(findings.is_empty());
    }
}
