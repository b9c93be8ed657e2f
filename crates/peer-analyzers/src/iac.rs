use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use peer_core::types::{Finding, Severity};

use crate::rules::{re, scan_lines, LineRule};
use crate::{extension, read_text, Analyzer};

/// Infrastructure-as-code misconfiguration rules for Terraform and
/// Kubernetes manifests.
pub struct Iac {
    terraform: Vec<LineRule>,
    kubernetes: Vec<LineRule>,
}

impl Default for Iac {
    fn default() -> Self {
        Self::new()
    }
}

impl Iac {
    pub fn new() -> Self {
        let terraform = vec![
            LineRule {
                rule: "open-ingress-cidr",
                re: re(r#""0\.0\.0\.0/0""#),
                unless: None,
                severity: Severity::High,
                message: "Security group open to the entire internet",
                suggestion: "Restrict the CIDR to known ranges",
                category: "security",
                cwe: &["CWE-284"],
            },
            LineRule {
                rule: "storage-unencrypted",
                re: re(r"encrypted\s*=\s*false"),
                unless: None,
                severity: Severity::High,
                message: "Storage resource created without encryption",
                suggestion: "Set encrypted = true",
                category: "security",
                cwe: &["CWE-311"],
            },
            LineRule {
                rule: "db-publicly-accessible",
                re: re(r"publicly_accessible\s*=\s*true"),
                unless: None,
                severity: Severity::High,
                message: "Database instance exposed publicly",
                suggestion: "Set publicly_accessible = false and front it privately",
                category: "security",
                cwe: &["CWE-284"],
            },
        ];
        let kubernetes = vec![
            LineRule {
                rule: "privileged-container",
                re: re(r"privileged:\s*true"),
                unless: None,
                severity: Severity::Critical,
                message: "Privileged container escapes most isolation",
                suggestion: "Drop privileged and grant specific capabilities",
                category: "security",
                cwe: &["CWE-250"],
            },
            LineRule {
                rule: "host-network",
                re: re(r"hostNetwork:\s*true"),
                unless: None,
                severity: Severity::High,
                message: "Pod shares the node network namespace",
                suggestion: "Remove hostNetwork unless strictly required",
                category: "security",
                cwe: &[],
            },
            LineRule {
                rule: "run-as-root",
                re: re(r"runAsUser:\s*0\b"),
                unless: None,
                severity: Severity::Medium,
                message: "Workload pinned to uid 0",
                suggestion: "Run as an unprivileged uid",
                category: "security",
                cwe: &["CWE-250"],
            },
        ];
        Self {
            terraform,
            kubernetes,
        }
    }

    fn looks_like_k8s(text: &str) -> bool {
        text.contains("apiVersion:") && text.contains("kind:")
    }
}

#[async_trait]
impl Analyzer for Iac {
    fn name(&self) -> &'static str {
        "iac"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files {
            match extension(file) {
                "tf" => {
                    let Some(text) = read_text(workdir, file) else {
                        continue;
                    };
                    findings.extend(scan_lines(file, &text, &self.terraform, "iac", "iac:terraform", None));
                }
                "yaml" | "yml" => {
                    let Some(text) = read_text(workdir, file) else {
                        continue;
                    };
                    if Self::looks_like_k8s(&text) {
                        findings.extend(scan_lines(file, &text, &self.kubernetes, "iac", "iac:kubernetes", None));
                    }
                }
                _ => {}
            }
        }
        Ok(findings)
    }
}
