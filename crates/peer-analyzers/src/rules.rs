use regex::Regex;

use peer_core::types::{Finding, Severity};

/// A single line-scoped pattern rule shared by the heuristic and
/// language-specific analyzers.
pub(crate) struct LineRule {
    pub rule: &'static str,
    pub re: Regex,
    /// Optional second pattern that suppresses a match (e.g. `await` already
    /// present on the line).
    pub unless: Option<Regex>,
    pub severity: Severity,
    pub message: &'static str,
    pub suggestion: &'static str,
    pub category: &'static str,
    pub cwe: &'static [&'static str],
}

impl LineRule {
    pub fn matches(&self, line: &str) -> bool {
        self.re.is_match(line) && !self.unless.as_ref().is_some_and(|u| u.is_match(line))
    }
}

/// Scan a file's lines against a rule set, emitting one finding per
/// `(line, rule)` hit.
pub(crate) fn scan_lines(
    file: &str,
    text: &str,
    rules: &[LineRule],
    analyzer: &str,
    source: &str,
    language: Option<&str>,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        for rule in rules {
            if !rule.matches(line) {
                continue;
            }
            let mut f = Finding::new(
                file,
                (idx + 1) as u32,
                rule.rule,
                analyzer,
                source,
                rule.severity,
                rule.message,
            )
            .with_suggestion(rule.suggestion)
            .with_snippet(line)
            .with_category(rule.category)
            .with_cwe(rule.cwe);
            if let Some(lang) = language {
                f = f.with_language(lang);
            }
            findings.push(f);
        }
    }
    findings
}

pub(crate) fn re(pattern: &str) -> Regex {
    #[allow(clippy::expect_used)]
    Regex::new(pattern).expect("static rule pattern must compile")
}
