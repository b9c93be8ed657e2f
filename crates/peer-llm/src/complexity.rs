use peer_core::types::{Finding, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

const COMPLEX_TAGS: &[&str] = &[
    "security",
    "logic-bug",
    "auth",
    "crypto",
    "injection",
    "secret",
];

fn is_complex(finding: &Finding) -> bool {
    if matches!(finding.severity, Severity::Critical | Severity::High) {
        return true;
    }
    let rule = finding.rule.to_lowercase();
    let category = finding
        .category
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    COMPLEX_TAGS
        .iter()
        .any(|t| rule.contains(t) || category.contains(t))
}

/// Classify a finding set. Each finding votes by rule tag and severity;
/// the majority wins, ties go to `Simple`.
pub fn classify(findings: &[Finding]) -> Complexity {
    let complex_votes = findings.iter().filter(|f| is_complex(f)).count();
    let simple_votes = findings.len() - complex_votes;
    if complex_votes > simple_votes {
        Complexity::Complex
    } else {
        Complexity::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(rule: &str, severity: Severity) -> Finding {
        Finding::new("a.js", 1, rule, "heuristics", "heuristics", severity, "m")
    }

    #[test]
    fn empty_set_is_simple() {
        assert_eq!(classify(&[]), Complexity::Simple);
    }

    #[test]
    fn high_severity_votes_complex() {
        let findings = vec![
            finding("long-line", Severity::High),
            finding("long-line", Severity::Critical),
            finding("long-line", Severity::Low),
        ];
        assert_eq!(classify(&findings), Complexity::Complex);
    }

    #[test]
    fn security_tags_vote_complex() {
        let findings = vec![
            finding("sql-injection-risk", Severity::Low),
            finding("weak-crypto-md5", Severity::Low),
            finding("console-log", Severity::Low),
        ];
        assert_eq!(classify(&findings), Complexity::Complex);
    }

    #[test]
    fn tie_goes_to_simple() {
        let findings = vec![
            finding("auth-bypass", Severity::Low),
            finding("console-log", Severity::Low),
        ];
        assert_eq!(classify(&findings), Complexity::Simple);
    }
}
