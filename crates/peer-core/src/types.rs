use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Severity ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_str(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Numeric weight used for cross-analyzer de-duplication and ranking.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    pub fn all() -> [Severity; 4] {
        [Self::Critical, Self::High, Self::Medium, Self::Low]
    }
}

// ── Finding ──────────────────────────────────────────────────────────────

const MAX_RULE_LEN: usize = 120;
const MAX_MESSAGE_LEN: usize = 500;
const MAX_SUGGESTION_LEN: usize = 500;
const MAX_EXAMPLE_LEN: usize = 1000;
const MAX_SNIPPET_LEN: usize = 300;

/// A single issue produced by one analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Stable within a run; assigned by the orchestrator after ranking.
    #[serde(default)]
    pub id: String,
    /// Repo-relative path.
    pub file: String,
    pub line: u32,
    #[serde(default = "default_column")]
    pub column: u32,
    pub rule: String,
    /// Producer name (registry key).
    pub analyzer: String,
    /// Producer subtype, for provenance (e.g. "heuristics:secrets").
    pub source: String,
    pub severity: Severity,
    pub severity_weight: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub example: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code_snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cwe: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owasp: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_by_patch_request_id: Option<String>,
}

fn default_column() -> u32 {
    1
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

impl Finding {
    /// Build a finding with field limits enforced (over-length text is truncated,
    /// never rejected; analyzers should not fail a run over a long message).
    pub fn new(
        file: impl Into<String>,
        line: u32,
        rule: &str,
        analyzer: &str,
        source: &str,
        severity: Severity,
        message: &str,
    ) -> Self {
        Self {
            id: String::new(),
            file: file.into(),
            line: line.max(1),
            column: 1,
            rule: truncate(rule, MAX_RULE_LEN),
            analyzer: analyzer.to_string(),
            source: source.to_string(),
            severity,
            severity_weight: severity.weight(),
            message: truncate(message, MAX_MESSAGE_LEN),
            suggestion: String::new(),
            example: String::new(),
            code_snippet: String::new(),
            reason: None,
            cwe: Vec::new(),
            owasp: Vec::new(),
            category: None,
            language: None,
            fixed: false,
            fixed_at: None,
            fixed_by_patch_request_id: None,
        }
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = column.max(1);
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = truncate(suggestion, MAX_SUGGESTION_LEN);
        self
    }

    pub fn with_example(mut self, example: &str) -> Self {
        self.example = truncate(example, MAX_EXAMPLE_LEN);
        self
    }

    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.code_snippet = truncate(snippet.trim_end(), MAX_SNIPPET_LEN);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn with_cwe(mut self, cwe: &[&str]) -> Self {
        self.cwe = cwe.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_owasp(mut self, owasp: &[&str]) -> Self {
        self.owasp = owasp.iter().map(|s| s.to_string()).collect();
        self
    }

    /// De-duplication key: analyzers must emit this uniquely; the orchestrator
    /// resolves collisions across analyzers.
    pub fn dedup_key(&self) -> (String, u32, String) {
        (self.file.clone(), self.line, self.rule.clone())
    }
}

// ── Per-severity summary ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Summary {
    pub fn count(findings: &[Finding]) -> Self {
        let mut s = Self::default();
        for f in findings {
            match f.severity {
                Severity::Critical => s.critical += 1,
                Severity::High => s.high += 1,
                Severity::Medium => s.medium += 1,
                Severity::Low => s.low += 1,
            }
        }
        s
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }
}

// ── PRRun ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }

    /// The analyze worker is the sole writer and moves strictly forward.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, RunStatus::Running)
                | (Self::Queued, RunStatus::Failed)
                | (Self::Running, RunStatus::Completed)
                | (Self::Running, RunStatus::Failed)
        )
    }
}

/// One analysis attempt for `(repo, pr_number, sha)`. The triple is globally
/// unique; a second webhook on the same sha is rejected with a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrRun {
    pub id: String,
    pub repo: String,
    pub pr_number: i64,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_sha: Option<String>,
    #[serde(default)]
    pub head_ref: String,
    pub installation_id: i64,
    pub status: RunStatus,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrRun {
    pub fn new(
        repo: &str,
        pr_number: i64,
        sha: &str,
        base_sha: Option<&str>,
        head_ref: &str,
        installation_id: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("run-{}-{}-{}", pr_number, &sha[..sha.len().min(12)], now.timestamp()),
            repo: repo.to_string(),
            pr_number,
            sha: sha.to_string(),
            base_sha: base_sha.map(str::to_string),
            head_ref: head_ref.to_string(),
            installation_id,
            status: RunStatus::Queued,
            findings: Vec::new(),
            summary: Summary::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── PatchRequest ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Queued,
    PreviewPartial,
    PreviewReady,
    Applying,
    Completed,
    Failed,
}

impl PatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::PreviewPartial => "preview_partial",
            Self::PreviewReady => "preview_ready",
            Self::Applying => "applying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "preview_partial" => Self::PreviewPartial,
            "preview_ready" => Self::PreviewReady,
            "applying" => Self::Applying,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::PreviewPartial => 1,
            Self::PreviewReady => 2,
            Self::Applying => 3,
            Self::Completed => 4,
            Self::Failed => 5,
        }
    }

    /// Transitions are monotone: a patch never regresses (e.g. from
    /// `preview_ready` back to `preview_partial` when a late save lands),
    /// and terminal states stay terminal.
    pub fn can_transition_to(&self, next: PatchStatus) -> bool {
        if matches!(self, Self::Completed | Self::Failed) {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HunkSource {
    Deterministic,
    Llm,
}

/// One line-scoped change inside a preview file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    pub finding_id: String,
    pub rule: String,
    /// 1-based line in the original file.
    pub line: u32,
    pub original: String,
    pub inserted: String,
    /// SHA-1 of the original line, verified again at apply time.
    pub original_checksum: String,
    pub source: HunkSource,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub requires_async: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eol {
    Lf,
    CrLf,
}

impl Eol {
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            Self::CrLf
        } else {
            Self::Lf
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Re-join `\n`-normalized text with this file's line endings.
    pub fn restore(&self, text: &str) -> String {
        match self {
            Self::Lf => text.to_string(),
            Self::CrLf => text.replace('\n', "\r\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewFile {
    pub file: String,
    pub ready: bool,
    #[serde(default)]
    pub hunks: Vec<Hunk>,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub improved_text: String,
    #[serde(default)]
    pub unified_diff: String,
    #[serde(default)]
    pub ai_rewritten: bool,
    pub eol: Eol,
    #[serde(default)]
    pub finding_ids: Vec<String>,
    #[serde(default)]
    pub change_summary: String,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl PreviewFile {
    pub fn pending(file: &str) -> Self {
        Self {
            file: file.to_string(),
            ready: false,
            hunks: Vec::new(),
            original_text: String::new(),
            improved_text: String::new(),
            unified_diff: String::new(),
            ai_rewritten: false,
            eol: Eol::Lf,
            finding_ids: Vec::new(),
            change_summary: String::new(),
            skipped: false,
            skip_reason: None,
        }
    }

    pub fn skipped(file: &str, reason: &str) -> Self {
        let mut f = Self::pending(file);
        f.ready = true;
        f.skipped = true;
        f.skip_reason = Some(reason.to_string());
        f
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    #[serde(default)]
    pub unified_diff: String,
    /// Ordering invariant: files appear in discovery order and progressive
    /// saves update entries in place, never reorder.
    #[serde(default)]
    pub files: Vec<PreviewFile>,
    #[serde(default)]
    pub files_expected: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedHunk {
    pub file: String,
    pub line: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResults {
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub applied: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<SkippedHunk>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_pr_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_pr_url: Option<String>,
    #[serde(default)]
    pub auto_merged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_merge_reason: Option<String>,
}

/// A request to fix a selected subset of a run's findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub id: String,
    pub run_id: String,
    pub repo: String,
    pub pr_number: i64,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub selected_finding_ids: Vec<String>,
    pub status: PatchStatus,
    #[serde(default)]
    pub preview: Preview,
    #[serde(default)]
    pub results: ApplyResults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatchRequest {
    pub fn new(run: &PrRun, user_id: Option<&str>, selected_finding_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("patch-{}-{}", run.pr_number, now.timestamp_millis()),
            run_id: run.id.clone(),
            repo: run.repo.clone(),
            pr_number: run.pr_number,
            sha: run.sha.clone(),
            user_id: user_id.map(str::to_string),
            selected_finding_ids,
            status: PatchStatus::Queued,
            preview: Preview::default(),
            results: ApplyResults::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Installation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Findings only, no autofix.
    Analyze,
    /// Findings + wait for an explicit selection.
    Review,
    /// Auto-preview and apply as a new PR.
    Commit,
    /// `commit` + attempt auto-merge.
    Merge,
}

impl Mode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "review" => Self::Review,
            "commit" => Self::Commit,
            "merge" => Self::Merge,
            _ => Self::Analyze,
        }
    }

    pub fn auto_fix(&self) -> bool {
        matches!(self, Self::Commit | Self::Merge)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoMergeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub require_tests: bool,
    #[serde(default)]
    pub require_reviews: u32,
}

impl Default for AutoMergeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            require_tests: true,
            require_reviews: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Subset of severities to retain; empty = keep all.
    #[serde(default)]
    pub severities: Vec<Severity>,
    #[serde(default = "default_max_files")]
    pub max_files_per_run: u32,
    #[serde(default)]
    pub auto_merge: AutoMergeConfig,
}

fn default_mode() -> Mode {
    Mode::Analyze
}

fn default_max_files() -> u32 {
    50
}

impl Default for InstallationConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Analyze,
            severities: Vec::new(),
            max_files_per_run: default_max_files(),
            auto_merge: AutoMergeConfig::default(),
        }
    }
}

impl InstallationConfig {
    pub fn retains(&self, severity: Severity) -> bool {
        self.severities.is_empty() || self.severities.contains(&severity)
    }
}

/// A tenant's enrollment of Peer against a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub installation_id: i64,
    pub repo: String,
    #[serde(default)]
    pub config: InstallationConfig,
    #[serde(default)]
    pub suspended: bool,
}

// ── User / Notification ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// −1 = unlimited.
    pub token_limit: i64,
    pub tokens_used: i64,
    pub purchased_tokens: i64,
    /// Decrypted provider → key map; bypasses platform quota when non-empty.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_weights() {
        assert_eq!(Severity::Critical.weight(), 4);
        assert_eq!(Severity::High.weight(), 3);
        assert_eq!(Severity::Medium.weight(), 2);
        assert_eq!(Severity::Low.weight(), 1);
    }

    #[test]
    fn finding_truncates_long_fields() {
        let long = "x".repeat(2000);
        let f = Finding::new("a.js", 1, &long, "heuristics", "heuristics", Severity::Low, &long)
            .with_suggestion(&long)
            .with_example(&long)
            .with_snippet(&long);
        assert_eq!(f.rule.len(), 120);
        assert_eq!(f.message.len(), 500);
        assert_eq!(f.suggestion.len(), 500);
        assert_eq!(f.example.len(), 1000);
        assert_eq!(f.code_snippet.len(), 300);
    }

    #[test]
    fn finding_line_floors_at_one() {
        let f = Finding::new("a.js", 0, "r", "a", "a", Severity::Low, "m");
        assert_eq!(f.line, 1);
        assert_eq!(f.column, 1);
    }

    #[test]
    fn summary_counts_by_severity() {
        let findings = vec![
            Finding::new("a", 1, "r1", "x", "x", Severity::Critical, "m"),
            Finding::new("a", 2, "r2", "x", "x", Severity::Low, "m"),
            Finding::new("b", 1, "r3", "x", "x", Severity::Low, "m"),
        ];
        let s = Summary::count(&findings);
        assert_eq!(s.critical, 1);
        assert_eq!(s.high, 0);
        assert_eq!(s.medium, 0);
        assert_eq!(s.low, 2);
        assert_eq!(s.total(), 3);
    }

    #[test]
    fn run_status_transitions() {
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Queued.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn patch_status_is_monotone() {
        assert!(PatchStatus::Queued.can_transition_to(PatchStatus::PreviewPartial));
        assert!(PatchStatus::PreviewPartial.can_transition_to(PatchStatus::PreviewReady));
        assert!(!PatchStatus::PreviewReady.can_transition_to(PatchStatus::PreviewPartial));
        assert!(PatchStatus::Applying.can_transition_to(PatchStatus::Failed));
        assert!(!PatchStatus::Completed.can_transition_to(PatchStatus::Failed));
        assert!(!PatchStatus::Failed.can_transition_to(PatchStatus::Queued));
    }

    #[test]
    fn eol_detect_and_restore() {
        assert_eq!(Eol::detect("a\r\nb"), Eol::CrLf);
        assert_eq!(Eol::detect("a\nb"), Eol::Lf);
        assert_eq!(Eol::CrLf.restore("a\nb\n"), "a\r\nb\r\n");
        assert_eq!(Eol::Lf.restore("a\nb\n"), "a\nb\n");
    }

    #[test]
    fn severity_filter_empty_retains_all() {
        let cfg = InstallationConfig::default();
        for s in Severity::all() {
            assert!(cfg.retains(s));
        }
        let cfg = InstallationConfig {
            severities: vec![Severity::Critical, Severity::High],
            ..Default::default()
        };
        assert!(cfg.retains(Severity::Critical));
        assert!(!cfg.retains(Severity::Low));
    }
}
