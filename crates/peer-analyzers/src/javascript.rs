use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use peer_core::types::{Finding, Severity};

use crate::rules::{re, scan_lines, LineRule};
use crate::{extension, read_text, Analyzer};

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// JavaScript / TypeScript pattern matcher.
pub struct JavaScript {
    rules: Vec<LineRule>,
}

impl Default for JavaScript {
    fn default() -> Self {
        Self::new()
    }
}

impl JavaScript {
    pub fn new() -> Self {
        let rules = vec![
            LineRule {
                rule: "missing-await-async-call",
                re: re(r"(?:^|[=\s(,{])(?:fetch|axios\.(?:get|post|put|patch|delete|request))\s*\("),
                unless: Some(re(r"\bawait\b|\.then\s*\(|\breturn\b")),
                severity: Severity::Medium,
                message: "Async call result is not awaited",
                suggestion: "Prefix the call with await inside an async function",
                category: "logic-bug",
                cwe: &[],
            },
            LineRule {
                rule: "var-keyword",
                re: re(r"^\s*var\s+[A-Za-z_$]"),
                unless: None,
                severity: Severity::Low,
                message: "var is function-scoped and hoisted",
                suggestion: "Use let or const",
                category: "style",
                cwe: &[],
            },
            LineRule {
                rule: "loose-equality",
                re: re(r"[^=!<>]==[^=]|[^!]!=[^=]"),
                unless: Some(re(r"={3}|!==")),
                severity: Severity::Low,
                message: "Loose equality coerces types",
                suggestion: "Use === / !==",
                category: "logic-bug",
                cwe: &[],
            },
            LineRule {
                rule: "console-log",
                re: re(r"\bconsole\.(log|debug|trace)\s*\("),
                unless: None,
                severity: Severity::Low,
                message: "Debug logging left in source",
                suggestion: "Remove the statement or use a structured logger",
                category: "style",
                cwe: &[],
            },
            LineRule {
                rule: "debugger-statement",
                re: re(r"^\s*debugger\b"),
                unless: None,
                severity: Severity::Medium,
                message: "debugger statement halts execution in dev tools",
                suggestion: "Remove before shipping",
                category: "reliability",
                cwe: &[],
            },
            LineRule {
                rule: "unhandled-promise",
                re: re(r"\.then\s*\([^)]*\)\s*;?\s*$"),
                unless: Some(re(r"\.catch\s*\(")),
                severity: Severity::Low,
                message: "Promise chain has no rejection handler",
                suggestion: "Attach .catch() or await inside try/catch",
                category: "reliability",
                cwe: &[],
            },
        ];
        Self { rules }
    }
}

#[async_trait]
impl Analyzer for JavaScript {
    fn name(&self) -> &'static str {
        "javascript"
    }

    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        for file in files {
            let ext = extension(file);
            if !JS_EXTENSIONS.contains(&ext) {
                continue;
            }
            let Some(text) = read_text(workdir, file) else {
                continue;
            };
            let language = if matches!(ext, "ts" | "tsx") {
                "typescript"
            } else {
                "javascript"
            };
            findings.extend(scan_lines(
                file,
                &text,
                &self.rules,
                "javascript",
                "javascript",
                Some(language),
            ));
        }
        Ok(findings)
    }
}
