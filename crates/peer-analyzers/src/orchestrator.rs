use std::collections::HashMap;

use peer_core::types::{Finding, Summary};

/// Orchestration output: the de-duplicated, ranked finding list and its
/// per-severity counts.
#[derive(Debug, Clone)]
pub struct Orchestrated {
    pub findings: Vec<Finding>,
    pub summary: Summary,
}

/// Normalize the raw cross-analyzer output:
///   1. de-duplicate on `(file, line, rule)`, preferring the higher
///      `severity_weight` and breaking ties with the more specific (longer)
///      `source`;
///   2. rank by severity descending, then file, then line;
///   3. count per-severity totals.
///
/// Deterministic: the same input always produces the same output, including
/// the assigned finding ids.
pub fn orchestrate(raw: Vec<Finding>) -> Orchestrated {
    let mut by_key: HashMap<(String, u32, String), Finding> = HashMap::new();
    for finding in raw {
        let key = finding.dedup_key();
        match by_key.get(&key) {
            Some(existing) if !prefer(&finding, existing) => {}
            _ => {
                by_key.insert(key, finding);
            }
        }
    }

    let mut findings: Vec<Finding> = by_key.into_values().collect();
    findings.sort_by(|a, b| {
        b.severity_weight
            .cmp(&a.severity_weight)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.rule.cmp(&b.rule))
    });

    for (idx, finding) in findings.iter_mut().enumerate() {
        finding.id = format!("f{}", idx + 1);
    }

    let summary = Summary::count(&findings);
    Orchestrated { findings, summary }
}

/// Does `candidate` win over `existing` for the same `(file, line, rule)`?
fn prefer(candidate: &Finding, existing: &Finding) -> bool {
    if candidate.severity_weight != existing.severity_weight {
        return candidate.severity_weight > existing.severity_weight;
    }
    candidate.source.len() > existing.source.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_core::types::Severity;

    fn finding(file: &str, line: u32, rule: &str, source: &str, severity: Severity) -> Finding {
        Finding::new(file, line, rule, "any", source, severity, "m")
    }

    #[test]
    fn deduplicates_on_file_line_rule() {
        let out = orchestrate(vec![
            finding("a.js", 3, "eval-usage", "heuristics", Severity::High),
            finding("a.js", 3, "eval-usage", "tool:semgrep", Severity::High),
            finding("a.js", 4, "eval-usage", "heuristics", Severity::High),
        ]);
        assert_eq!(out.findings.len(), 2);

        // Invariant: no two findings share (file, line, rule).
        let mut keys: Vec<_> = out.findings.iter().map(Finding::dedup_key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), out.findings.len());
    }

    #[test]
    fn higher_weight_wins_then_longer_source() {
        let out = orchestrate(vec![
            finding("a.js", 3, "r", "short", Severity::Medium),
            finding("a.js", 3, "r", "sh", Severity::High),
        ]);
        assert_eq!(out.findings[0].severity, Severity::High);

        let out = orchestrate(vec![
            finding("a.js", 3, "r", "sh", Severity::High),
            finding("a.js", 3, "r", "much-longer-source", Severity::High),
        ]);
        assert_eq!(out.findings[0].source, "much-longer-source");
    }

    #[test]
    fn ranks_by_severity_then_file_then_line() {
        let out = orchestrate(vec![
            finding("b.js", 9, "r1", "s", Severity::Low),
            finding("b.js", 2, "r2", "s", Severity::Critical),
            finding("a.js", 5, "r3", "s", Severity::Critical),
            finding("a.js", 1, "r4", "s", Severity::High),
        ]);
        let order: Vec<(String, u32)> = out
            .findings
            .iter()
            .map(|f| (f.file.clone(), f.line))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.js".to_string(), 5),
                ("b.js".to_string(), 2),
                ("a.js".to_string(), 1),
                ("b.js".to_string(), 9),
            ]
        );
    }

    #[test]
    fn summary_matches_per_severity_counts() {
        let out = orchestrate(vec![
            finding("a.js", 1, "r1", "s", Severity::Critical),
            finding("a.js", 2, "r2", "s", Severity::High),
            finding("a.js", 3, "r3", "s", Severity::High),
            finding("a.js", 4, "r4", "s", Severity::Low),
        ]);
        assert_eq!(out.summary.critical, 1);
        assert_eq!(out.summary.high, 2);
        assert_eq!(out.summary.medium, 0);
        assert_eq!(out.summary.low, 1);
        assert_eq!(out.summary.total(), out.findings.len() as u32);
    }

    #[test]
    fn empty_input_summarizes_to_zeroes() {
        let out = orchestrate(Vec::new());
        assert!(out.findings.is_empty());
        assert_eq!(out.summary, Summary::default());
    }

    #[test]
    fn rerun_is_deterministic() {
        let input = || {
            vec![
                finding("b.js", 9, "r1", "s", Severity::Low),
                finding("a.js", 2, "r2", "longer-source", Severity::Critical),
                finding("a.js", 2, "r2", "s", Severity::Critical),
                finding("c.py", 7, "r3", "s", Severity::Medium),
            ]
        };
        let first = orchestrate(input());
        let second = orchestrate(input());
        let ids = |o: &Orchestrated| {
            o.findings
                .iter()
                .map(|f| (f.id.clone(), f.dedup_key(), f.source.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.summary, second.summary);
    }
}
