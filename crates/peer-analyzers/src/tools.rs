use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use peer_core::types::{Finding, Severity};

use crate::{extension, file_name, Analyzer};

const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// All external-tool adapters. Each probes for its binary on the host and
/// returns an empty list when absent; optional tooling never fails a run.
pub fn adapters() -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(Eslint),
        Arc::new(Semgrep),
        Arc::new(Hadolint),
        Arc::new(Trivy),
    ]
}

async fn tool_present(tool: &str) -> bool {
    let probe = tokio::process::Command::new(tool)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    matches!(tokio::time::timeout(Duration::from_secs(10), probe).await, Ok(Ok(s)) if s.success())
}

/// Run a tool and capture stdout. Non-zero exits are expected (linters exit
/// 1 when they find something); only spawn failures and timeouts are errors.
async fn run_tool(workdir: &Path, tool: &str, args: &[&str]) -> Result<String> {
    let output = tokio::time::timeout(
        TOOL_TIMEOUT,
        tokio::process::Command::new(tool)
            .args(args)
            .current_dir(workdir)
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("{tool} timed out"))??;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn severity_from_level(level: &str) -> Severity {
    match level.to_lowercase().as_str() {
        "critical" => Severity::Critical,
        "error" | "high" => Severity::High,
        "warning" | "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

// ── eslint ────────────────────────────────────────────────────────────────

pub struct Eslint;

#[derive(Deserialize)]
struct EslintFile {
    #[serde(rename = "filePath")]
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Deserialize)]
struct EslintMessage {
    #[serde(rename = "ruleId")]
    rule_id: Option<String>,
    /// 1 = warn, 2 = error.
    #[serde(default)]
    severity: u8,
    #[serde(default)]
    message: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    column: u32,
}

#[async_trait]
impl Analyzer for Eslint {
    fn name(&self) -> &'static str {
        "eslint"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let targets: Vec<&String> = files
            .iter()
            .filter(|f| matches!(extension(f), "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs"))
            .collect();
        if targets.is_empty() || !tool_present("eslint").await {
            debug!("eslint absent or nothing to lint, skipping");
            return Ok(Vec::new());
        }

        let mut args = vec!["--format", "json", "--no-error-on-unmatched-pattern"];
        args.extend(targets.iter().map(|s| s.as_str()));
        let stdout = run_tool(workdir, "eslint", &args).await?;

        let parsed: Vec<EslintFile> = match serde_json::from_str(&stdout) {
            Ok(v) => v,
            Err(e) => {
                warn!("eslint output was not parseable json: {e}");
                return Ok(Vec::new());
            }
        };

        let mut findings = Vec::new();
        for entry in parsed {
            let rel = entry
                .file_path
                .strip_prefix(&format!("{}/", workdir.display()))
                .unwrap_or(&entry.file_path)
                .to_string();
            for msg in entry.messages {
                let Some(rule_id) = msg.rule_id else { continue };
                let severity = if msg.severity >= 2 {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                findings.push(
                    Finding::new(
                        rel.clone(),
                        msg.line.max(1),
                        &format!("eslint:{rule_id}"),
                        "eslint",
                        "tool:eslint",
                        severity,
                        &msg.message,
                    )
                    .with_column(msg.column.max(1))
                    .with_category("lint"),
                );
            }
        }
        Ok(findings)
    }
}

// ── semgrep ───────────────────────────────────────────────────────────────

pub struct Semgrep;

#[derive(Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
}

#[derive(Deserialize)]
struct SemgrepResult {
    check_id: String,
    path: String,
    start: SemgrepPos,
    extra: SemgrepExtra,
}

#[derive(Deserialize)]
struct SemgrepPos {
    #[serde(default)]
    line: u32,
    #[serde(default)]
    col: u32,
}

#[derive(Deserialize)]
struct SemgrepExtra {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
}

#[async_trait]
impl Analyzer for Semgrep {
    fn name(&self) -> &'static str {
        "semgrep"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        if files.is_empty() || !tool_present("semgrep").await {
            debug!("semgrep absent, skipping");
            return Ok(Vec::new());
        }

        let mut args = vec!["--json", "--quiet", "--config", "auto"];
        args.extend(files.iter().map(|s| s.as_str()));
        let stdout = run_tool(workdir, "semgrep", &args).await?;

        let parsed: SemgrepOutput = match serde_json::from_str(&stdout) {
            Ok(v) => v,
            Err(e) => {
                warn!("semgrep output was not parseable json: {e}");
                return Ok(Vec::new());
            }
        };

        Ok(parsed
            .results
            .into_iter()
            .map(|r| {
                Finding::new(
                    r.path,
                    r.start.line.max(1),
                    &r.check_id,
                    "semgrep",
                    "tool:semgrep",
                    severity_from_level(&r.extra.severity),
                    &r.extra.message,
                )
                .with_column(r.start.col.max(1))
                .with_category("security")
            })
            .collect())
    }
}

// ── hadolint ──────────────────────────────────────────────────────────────

pub struct Hadolint;

#[derive(Deserialize)]
struct HadolintIssue {
    #[serde(default)]
    file: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    level: String,
}

#[async_trait]
impl Analyzer for Hadolint {
    fn name(&self) -> &'static str {
        "hadolint"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let dockerfiles: Vec<&String> = files
            .iter()
            .filter(|f| {
                let name = file_name(f);
                name == "Dockerfile" || name.starts_with("Dockerfile.")
            })
            .collect();
        if dockerfiles.is_empty() || !tool_present("hadolint").await {
            debug!("hadolint absent or no dockerfiles, skipping");
            return Ok(Vec::new());
        }

        let mut findings = Vec::new();
        for file in dockerfiles {
            let stdout = run_tool(workdir, "hadolint", &["--format", "json", file]).await?;
            let issues: Vec<HadolintIssue> = match serde_json::from_str(&stdout) {
                Ok(v) => v,
                Err(e) => {
                    warn!("hadolint output was not parseable json: {e}");
                    continue;
                }
            };
            for issue in issues {
                let file = if issue.file.is_empty() {
                    file.clone()
                } else {
                    issue.file
                };
                findings.push(
                    Finding::new(
                        file,
                        issue.line.max(1),
                        &format!("hadolint:{}", issue.code),
                        "hadolint",
                        "tool:hadolint",
                        severity_from_level(&issue.level),
                        &issue.message,
                    )
                    .with_category("lint"),
                );
            }
        }
        Ok(findings)
    }
}

// ── trivy ─────────────────────────────────────────────────────────────────

pub struct Trivy;

#[derive(Deserialize)]
struct TrivyOutput {
    #[serde(rename = "Results", default)]
    results: Vec<TrivyResult>,
}

#[derive(Deserialize)]
struct TrivyResult {
    #[serde(rename = "Target", default)]
    target: String,
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Vec<TrivyVuln>,
}

#[derive(Deserialize)]
struct TrivyVuln {
    #[serde(rename = "VulnerabilityID", default)]
    id: String,
    #[serde(rename = "PkgName", default)]
    pkg: String,
    #[serde(rename = "Severity", default)]
    severity: String,
    #[serde(rename = "Title", default)]
    title: String,
}

#[async_trait]
impl Analyzer for Trivy {
    fn name(&self) -> &'static str {
        "trivy"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        // Dependency scanning only makes sense when a manifest changed.
        let manifest_changed = files.iter().any(|f| {
            matches!(
                file_name(f),
                "package.json"
                    | "package-lock.json"
                    | "requirements.txt"
                    | "Pipfile.lock"
                    | "go.sum"
                    | "Cargo.lock"
            )
        });
        if !manifest_changed || !tool_present("trivy").await {
            debug!("trivy absent or no dependency manifests changed, skipping");
            return Ok(Vec::new());
        }

        let stdout = run_tool(workdir, "trivy", &["fs", "--format", "json", "--quiet", "."]).await?;
        let parsed: TrivyOutput = match serde_json::from_str(&stdout) {
            Ok(v) => v,
            Err(e) => {
                warn!("trivy output was not parseable json: {e}");
                return Ok(Vec::new());
            }
        };

        let mut findings = Vec::new();
        for result in parsed.results {
            for vuln in result.vulnerabilities {
                findings.push(
                    Finding::new(
                        result.target.clone(),
                        1,
                        &format!("trivy:{}", vuln.id),
                        "trivy",
                        "tool:trivy",
                        severity_from_level(&vuln.severity),
                        &format!("{}: {}", vuln.pkg, vuln.title),
                    )
                    .with_category("dependency"),
                );
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_tool_levels_to_severity() {
        assert_eq!(severity_from_level("CRITICAL"), Severity::Critical);
        assert_eq!(severity_from_level("error"), Severity::High);
        assert_eq!(severity_from_level("warning"), Severity::Medium);
        assert_eq!(severity_from_level("info"), Severity::Low);
        assert_eq!(severity_from_level(""), Severity::Low);
    }

    #[tokio::test]
    async fn absent_tool_returns_empty() {
        // A tool name that cannot exist on the host.
        assert!(!tool_present("peer-definitely-not-a-tool").await);
        let findings = Eslint
            .analyze(Path::new("."), &["app.js".into()])
            .await
            .unwrap();
        // eslint may or may not exist on the host running the tests; either
        // way the adapter must not error.
        let _ = findings;
    }

    #[test]
    fn eslint_json_parses() {
        let raw = r#"[{"filePath":"/w/app.js","messages":[
            {"ruleId":"no-unused-vars","severity":2,"message":"x is unused","line":3,"column":7},
            {"ruleId":null,"severity":2,"message":"parse error","line":1,"column":1}
        ]}]"#;
        let parsed: Vec<EslintFile> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0].messages.len(), 2);
        assert_eq!(parsed[0].messages[0].rule_id.as_deref(), Some("no-unused-vars"));
        assert!(parsed[0].messages[1].rule_id.is_none());
    }

    #[test]
    fn trivy_json_parses() {
        let raw = r#"{"Results":[{"Target":"package-lock.json","Vulnerabilities":[
            {"VulnerabilityID":"CVE-2024-1234","PkgName":"lodash","Severity":"HIGH","Title":"proto pollution"}
        ]}]}"#;
        let parsed: TrivyOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results[0].vulnerabilities[0].id, "CVE-2024-1234");
    }
}
