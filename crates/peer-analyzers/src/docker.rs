use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use peer_core::types::{Finding, Severity};

use crate::rules::{re, scan_lines, LineRule};
use crate::{file_name, read_text, Analyzer};

/// Dockerfile rules. Line rules hit per instruction; whole-file rules
/// (missing USER, missing HEALTHCHECK) are evaluated once per file and
/// reported on line 1.
pub struct Dockerfile {
    line_rules: Vec<LineRule>,
}

impl Default for Dockerfile {
    fn default() -> Self {
        Self::new()
    }
}

impl Dockerfile {
    pub fn new() -> Self {
        let line_rules = vec![
            LineRule {
                rule: "latest-tag",
                re: re(r"(?i)^\s*FROM\s+([^\s:@]+|[^\s@]+:latest)(\s+AS\s+\w+)?\s*$"),
                unless: None,
                severity: Severity::Medium,
                message: "Base image is unpinned (implicit or explicit :latest)",
                suggestion: "Pin the base image to a version tag or digest",
                category: "reliability",
                cwe: &[],
            },
            LineRule {
                rule: "add-instead-of-copy",
                re: re(r"(?i)^ADD\s+"),
                unless: Some(re(r"(?i)^ADD\s+https?://|\.tar")),
                severity: Severity::Low,
                message: "ADD has surprising archive/url semantics",
                suggestion: "Use COPY for plain files",
                category: "style",
                cwe: &[],
            },
            LineRule {
                rule: "apt-no-cleanup",
                re: re(r"(?i)apt-get\s+install"),
                unless: Some(re(r"rm\s+-rf\s+/var/lib/apt/lists")),
                severity: Severity::Low,
                message: "apt cache left in the layer",
                suggestion: "Clean /var/lib/apt/lists in the same RUN",
                category: "style",
                cwe: &[],
            },
        ];
        Self { line_rules }
    }

    fn is_dockerfile(file: &str) -> bool {
        let name = file_name(file);
        name == "Dockerfile" || name.starts_with("Dockerfile.")
    }
}

#[async_trait]
impl Analyzer for Dockerfile {
    fn name(&self) -> &'static str {
        "dockerfile"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files {
            if !Self::is_dockerfile(file) {
                continue;
            }
            let Some(text) = read_text(workdir, file) else {
                continue;
            };

            findings.extend(scan_lines(
                file,
                &text,
                &self.line_rules,
                "dockerfile",
                "dockerfile",
                None,
            ));

            // File-level rules: one verdict for the whole Dockerfile.
            let has_user = text
                .lines()
                .any(|l| l.trim_start().to_uppercase().starts_with("USER "));
            if !has_user {
                findings.push(
                    Finding::new(
                        file,
                        1,
                        "missing-user",
                        "dockerfile",
                        "dockerfile",
                        Severity::High,
                        "Container runs as root (no USER instruction)",
                    )
                    .with_suggestion("Add a USER instruction with an unprivileged account")
                    .with_category("security")
                    .with_cwe(&["CWE-250"]),
                );
            }
            let has_healthcheck = text
                .lines()
                .any(|l| l.trim_start().to_uppercase().starts_with("HEALTHCHECK"));
            if !has_healthcheck {
                findings.push(
                    Finding::new(
                        file,
                        1,
                        "missing-healthcheck",
                        "dockerfile",
                        "dockerfile",
                        Severity::Low,
                        "Image defines no HEALTHCHECK",
                    )
                    .with_suggestion("Add a HEALTHCHECK so orchestrators can detect a wedged container")
                    .with_category("reliability"),
                );
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
        std::fs::write(dir.path().join("Dockerfile"), contents).unwrap();
        Dockerfile::new()
            .analyze(dir.path(), &["Dockerfile".into()])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn file_level_rules_fire_once_per_file() {
        // Several instructions, but exactly one missing-healthcheck and one
        // missing-user verdict.
        let findings = run("FROM alpine:3.20\nRUN echo a\nRUN echo b\nRUN echo c\n").await;
        let hc: Vec<_> = findings.iter().filter(|f| f.rule == "missing-healthcheck").collect();
        let user: Vec<_> = findings.iter().filter(|f| f.rule == "missing-user").collect();
        assert_eq!(hc.len(), 1);
        assert_eq!(user.len(), 1);
        assert_eq!(hc[0].line, 1);
    }

    #[tokio::test]
    async fn satisfied_file_rules_stay_quiet() {
        let findings = run(
            "FROM alpine:3.20\nUSER app\nHEALTHCHECK CMD curl -f http://localhost/ || exit 1\n",
        )
        .await;
        assert!(findings.iter().all(|f| f.rule != "missing-user"));
        assert!(findings.iter().all(|f| f.rule != "missing-healthcheck"));
    }

    #[tokio::test]
    async fn unpinned_base_image_flagged() {
        let findings = run("FROM node\nUSER app\nHEALTHCHECK CMD true\n").await;
        assert!(findings.iter().any(|f| f.rule == "latest-tag"));
    }

    #[tokio::test]
    async fn only_dockerfiles_are_considered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Makefile"), "FROM x\n").unwrap();
        let findings = Dockerfile::new()
            .analyze(dir.path(), &["Makefile".into()])
            .await
            .unwrap();
        assert!(findings.is_empty());
    }
}
