use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use peer_core::config::Config;
use peer_core::crypto::KeyCipher;
use peer_core::db::Db;
use peer_core::git::{clone_url, Workspace};
use peer_core::types::{
    Eol, Finding, Hunk, HunkSource, PatchRequest, PatchStatus, PreviewFile, SkippedHunk, User,
};
use peer_llm::cache::CacheInput;
use peer_llm::{QuotaExceeded, RouteOptions, Router};

use crate::comment::{framed_fragment, style_for};
use crate::line_checksum;
use crate::minimal::{self, PatchPolicy};
use crate::rewrite;
use crate::syntax::{self, SyntaxVerdict};
use crate::transformers;

// ── Non-code detection ────────────────────────────────────────────────────

const SKIP_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "svg", "pdf", "zip", "gz", "tar", "woff", "woff2",
    "ttf", "eot", "mp4", "webm", "lock", "min.js", "min.css",
];

/// Files that are never autofixed: docs, licenses, lockfiles, dotfiles,
/// minified and binary assets.
pub fn skip_reason(file: &str) -> Option<&'static str> {
    let name = std::path::Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file);
    let lower = name.to_lowercase();

    if lower.starts_with("readme") || lower.starts_with("license") || lower.starts_with("changelog")
    {
        return Some("documentation");
    }
    if matches!(
        name,
        "package-lock.json" | "yarn.lock" | "pnpm-lock.yaml" | "Cargo.lock" | "poetry.lock"
    ) {
        return Some("lockfile");
    }
    if name.starts_with('.') {
        return Some("dotfile");
    }
    if lower.ends_with(".min.js") || lower.ends_with(".min.css") {
        return Some("minified");
    }
    if lower.ends_with(".md") || lower.ends_with(".markdown") || lower.ends_with(".txt") {
        return Some("documentation");
    }
    let ext = std::path::Path::new(&lower)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if SKIP_EXTENSIONS.contains(&ext) {
        return Some("binary_or_generated");
    }
    None
}

// ── Shared hunk application ───────────────────────────────────────────────

/// Apply non-failed hunks to `lines` (1-based line targets against the text
/// the hunks were computed from). With `verify_checksum` each target line is
/// re-hashed first and mismatches are skipped; that is the apply-time
/// defense against upstream edits between preview and apply.
///
/// Returns the finding ids applied and the hunks skipped with reasons.
pub fn apply_hunks(
    lines: &mut Vec<String>,
    hunks: &[Hunk],
    verify_checksum: bool,
    max_patches: usize,
) -> (Vec<String>, Vec<SkippedHunk>) {
    let mut applied = Vec::new();
    let mut skipped = Vec::new();

    let mut eligible: Vec<&Hunk> = hunks.iter().filter(|h| !h.failed).collect();
    eligible.sort_by_key(|h| h.line);

    let mut selected: Vec<&Hunk> = Vec::new();
    for hunk in eligible {
        if selected.len() >= max_patches {
            skipped.push(SkippedHunk {
                file: String::new(),
                line: hunk.line,
                reason: "max_patches_per_file".to_string(),
            });
            continue;
        }
        if hunk.line < 1 || hunk.line as usize > lines.len() {
            skipped.push(SkippedHunk {
                file: String::new(),
                line: hunk.line,
                reason: "line_out_of_range".to_string(),
            });
            continue;
        }
        if verify_checksum {
            let current = &lines[hunk.line as usize - 1];
            if line_checksum(current) != hunk.original_checksum {
                skipped.push(SkippedHunk {
                    file: String::new(),
                    line: hunk.line,
                    reason: "checksum_mismatch".to_string(),
                });
                continue;
            }
        }
        selected.push(hunk);
    }

    // Async markings first: they edit declaration lines above the hunks,
    // while indices are still those of the unmodified text.
    for hunk in &selected {
        if hunk.requires_async {
            transformers::make_enclosing_async(lines, hunk.line as usize - 1);
        }
    }

    // Replace bottom-up so earlier line numbers stay valid.
    for hunk in selected.iter().rev() {
        let idx = hunk.line as usize - 1;
        let fragment: Vec<String> = hunk.inserted.lines().map(str::to_string).collect();
        lines.splice(idx..=idx, fragment);
        applied.push(hunk.finding_id.clone());
    }
    applied.reverse();

    (applied, skipped)
}

// ── Preview engine ────────────────────────────────────────────────────────

enum Strategy {
    Minimal,
    Full,
}

pub struct PreviewEngine {
    db: Arc<Db>,
    router: Arc<Router>,
    config: Arc<Config>,
    cipher: Option<KeyCipher>,
}

impl PreviewEngine {
    pub fn new(db: Arc<Db>, router: Arc<Router>, config: Arc<Config>) -> Self {
        let cipher = if config.encryption_key.is_empty() {
            None
        } else {
            KeyCipher::from_base64(&config.encryption_key).ok()
        };
        Self {
            db,
            router,
            config,
            cipher,
        }
    }

    /// Handle one `preview_file` job. Idempotent: a re-delivered job for an
    /// already-ready file (or a patch that already failed) is a no-op.
    pub async fn process_file(&self, patch_id: &str, file: &str) -> Result<()> {
        let Some(patch) = self.db.get_patch(patch_id)? else {
            warn!(patch_id, "preview job for unknown patch, dropping");
            return Ok(());
        };
        if matches!(patch.status, PatchStatus::Failed | PatchStatus::Completed) {
            return Ok(());
        }
        if patch
            .preview
            .files
            .iter()
            .any(|f| f.file == file && f.ready)
        {
            return Ok(());
        }

        let preview_file = match self.build_for_patch(&patch, file).await {
            Ok(pf) => pf,
            Err(e) if e.downcast_ref::<QuotaExceeded>().is_some() => {
                warn!(patch_id, "quota denied, failing patch");
                self.db
                    .transition_patch(patch_id, PatchStatus::Failed, Some("token_limit_exceeded"))?;
                let user_id = patch.user_id.clone().unwrap_or_default();
                self.db.insert_notification(
                    &user_id,
                    "token_limit_exceeded",
                    &format!("Autofix for {}#{} stopped: token limit reached", patch.repo, patch.pr_number),
                )?;
                return Ok(());
            }
            Err(e) => {
                warn!(patch_id, file, "preview failed for file: {e:#}");
                let mut pf = PreviewFile::skipped(file, "preview_error");
                pf.change_summary = format!("{e:#}");
                pf
            }
        };

        self.record(patch_id, file, preview_file)
    }

    async fn build_for_patch(&self, patch: &PatchRequest, file: &str) -> Result<PreviewFile> {
        if let Some(reason) = skip_reason(file) {
            return Ok(PreviewFile::skipped(file, reason));
        }

        let run = self
            .db
            .get_run(&patch.run_id)?
            .with_context(|| format!("run {} missing for patch {}", patch.run_id, patch.id))?;
        let selected: HashSet<&String> = patch.selected_finding_ids.iter().collect();
        let findings: Vec<Finding> = run
            .findings
            .iter()
            .filter(|f| f.file == file && selected.contains(&f.id))
            .cloned()
            .collect();
        if findings.is_empty() {
            return Ok(PreviewFile::skipped(file, "no_selected_findings"));
        }

        let url = clone_url(&self.config.git_host_url, &patch.repo, &self.config.github_token);
        let workspace = Workspace::checkout(&url, &patch.sha).await?;
        let Ok(raw) = workspace.read_file(file) else {
            return Ok(PreviewFile::skipped(file, "file_missing"));
        };

        let user = self.load_user(patch)?;
        self.build_preview_file(file, &raw, &findings, user.as_ref())
            .await
    }

    /// Compute the preview artifact for one file: deterministic transformers,
    /// then the LLM pass per the fix mode, then syntax validation and the
    /// per-file unified diff.
    pub async fn build_preview_file(
        &self,
        file: &str,
        raw: &str,
        findings: &[Finding],
        user: Option<&User>,
    ) -> Result<PreviewFile> {
        let eol = Eol::detect(raw);
        let normalized = raw.replace("\r\n", "\n");
        let lines: Vec<String> = normalized.lines().map(str::to_string).collect();

        let mut preview = PreviewFile::pending(file);
        preview.eol = eol;
        preview.original_text = normalized.clone();
        preview.finding_ids = findings.iter().map(|f| f.id.clone()).collect();

        // 1. Deterministic transformers.
        let style = style_for(file);
        let mut det_lines: HashSet<u32> = HashSet::new();
        let mut unfixed: Vec<Finding> = Vec::new();
        let mut any_failed = false;
        for finding in findings {
            let Some(transformer) = transformers::for_rule(&finding.rule) else {
                unfixed.push(finding.clone());
                continue;
            };
            let idx = finding.line as usize;
            if idx < 1 || idx > lines.len() {
                any_failed = true;
                unfixed.push(finding.clone());
                continue;
            }
            let original = lines[idx - 1].clone();
            match transformer.apply(&original) {
                Some(t) => {
                    let fragment =
                        framed_fragment(style, &finding.rule, &original, &t.inserted_line);
                    preview.hunks.push(Hunk {
                        finding_id: finding.id.clone(),
                        rule: finding.rule.clone(),
                        line: finding.line,
                        original: original.clone(),
                        inserted: fragment,
                        original_checksum: line_checksum(&original),
                        source: HunkSource::Deterministic,
                        failed: false,
                        reason: Some(t.reason.to_string()),
                        requires_async: t.requires_async,
                    });
                    det_lines.insert(finding.line);
                }
                None => {
                    any_failed = true;
                    preview.hunks.push(Hunk {
                        finding_id: finding.id.clone(),
                        rule: finding.rule.clone(),
                        line: finding.line,
                        original: original.clone(),
                        inserted: String::new(),
                        original_checksum: line_checksum(&original),
                        source: HunkSource::Deterministic,
                        failed: true,
                        reason: Some("pattern_mismatch".to_string()),
                        requires_async: false,
                    });
                    unfixed.push(finding.clone());
                }
            }
        }

        let deterministic_count = preview.hunks.iter().filter(|h| !h.failed).count();
        let unchanged = deterministic_count == 0;

        // 2. LLM pass, gated by the fix mode.
        let run_llm = !unfixed.is_empty()
            && match self.config.llm_fix_mode.as_str() {
                "always" => true,
                "unchanged_only" => unchanged,
                _ => any_failed || unchanged,
            };

        if run_llm {
            self.llm_pass(&mut preview, &normalized, &lines, &unfixed, &det_lines, user)
                .await?;
        }

        // 3. Materialize the improved text and validate it.
        if !preview.ai_rewritten {
            let mut improved = lines.clone();
            let (_, _) = apply_hunks(&mut improved, &preview.hunks, false, usize::MAX);
            let mut text = improved.join("\n");
            if normalized.ends_with('\n') {
                text.push('\n');
            }
            preview.improved_text = text;
        }

        if preview.improved_text != normalized {
            if let SyntaxVerdict::Failed(detail) =
                syntax::check(file, &preview.improved_text).await?
            {
                warn!(file, "syntax check failed, discarding llm output: {detail}");
                self.discard_llm_output(&mut preview, &lines, &normalized);
            }
        }

        // 4. Per-file unified diff and summary.
        preview.unified_diff =
            crate::diff::unified_diff(file, &preview.original_text, &preview.improved_text);
        let llm_count = preview
            .hunks
            .iter()
            .filter(|h| !h.failed && h.source == HunkSource::Llm)
            .count();
        let failed_count = preview.hunks.iter().filter(|h| h.failed).count();
        preview.change_summary = if preview.ai_rewritten {
            format!("full file rewrite covering {} finding(s)", findings.len())
        } else {
            format!(
                "{deterministic_count} deterministic fix(es), {llm_count} model patch(es), {failed_count} failed"
            )
        };
        preview.ready = true;
        Ok(preview)
    }

    async fn llm_pass(
        &self,
        preview: &mut PreviewFile,
        normalized: &str,
        lines: &[String],
        unfixed: &[Finding],
        det_lines: &HashSet<u32>,
        user: Option<&User>,
    ) -> Result<()> {
        let model = self.router.primary_model(unfixed, None);
        let strategy = match self.config.llm_strategy.as_str() {
            "minimal" => Strategy::Minimal,
            "full" => Strategy::Full,
            _ => {
                if self.router.primary_provider_name(unfixed, None) == "gemini" {
                    Strategy::Minimal
                } else {
                    Strategy::Full
                }
            }
        };

        let req = match strategy {
            Strategy::Minimal => minimal::build_prompt(&preview.file, normalized, unfixed),
            Strategy::Full => rewrite::build_prompt(&preview.file, normalized, unfixed),
        };
        let opts = RouteOptions {
            provider_override: None,
            cache_input: Some(CacheInput::new(&preview.file, normalized, unfixed, &model)),
            user,
        };

        let response = match self.router.call(&req, unfixed, opts).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                info!(file = %preview.file, "provider chain exhausted, deterministic fixes only");
                return Ok(());
            }
            // Quota denial must propagate; anything else was already
            // swallowed by the router.
            Err(e) => return Err(e),
        };

        match strategy {
            Strategy::Minimal => {
                let patches = minimal::parse_patches(&response.text);
                let policy = PatchPolicy {
                    max_patches_per_file: self.config.llm_max_patches_per_file,
                    allow_multiline: self.config.llm_allow_multiline,
                };
                let hunks = minimal::hunks_from_patches(
                    &preview.file,
                    lines,
                    patches,
                    det_lines,
                    &policy,
                );
                preview.hunks.extend(hunks);
            }
            Strategy::Full => {
                if let Some(improved) = rewrite::accept(normalized, &response.text) {
                    preview.ai_rewritten = true;
                    preview.improved_text = improved;
                }
            }
        }
        Ok(())
    }

    /// Roll the preview back to deterministic output after a failed syntax
    /// check, marking the model's hunks accordingly.
    fn discard_llm_output(&self, preview: &mut PreviewFile, lines: &[String], normalized: &str) {
        preview.ai_rewritten = false;
        for hunk in &mut preview.hunks {
            if hunk.source == HunkSource::Llm && !hunk.failed {
                hunk.failed = true;
                hunk.reason = Some("syntax_check_failed".to_string());
            }
        }
        let mut improved = lines.to_vec();
        let (_, _) = apply_hunks(&mut improved, &preview.hunks, false, usize::MAX);
        let mut text = improved.join("\n");
        if normalized.ends_with('\n') {
            text.push('\n');
        }
        preview.improved_text = text;
    }

    fn load_user(&self, patch: &PatchRequest) -> Result<Option<User>> {
        let Some(ref user_id) = patch.user_id else {
            return Ok(None);
        };
        let Some(mut user) = self.db.get_user(user_id)? else {
            return Ok(None);
        };
        user.api_keys = match self.cipher {
            Some(ref cipher) => {
                let mut decrypted = HashMap::new();
                for (provider, ciphertext) in &user.api_keys {
                    match cipher.decrypt(ciphertext) {
                        Ok(key) => {
                            decrypted.insert(provider.clone(), key);
                        }
                        Err(e) => warn!(user_id, provider, "api key decrypt failed: {e:#}"),
                    }
                }
                decrypted
            }
            // No encryption key configured: stored keys are unusable.
            None => HashMap::new(),
        };
        Ok(Some(user))
    }

    /// Fold a finished per-file artifact into the patch preview. Entries are
    /// updated in place in discovery order; completion counts drive the
    /// `queued → preview_partial → preview_ready` transitions.
    fn record(&self, patch_id: &str, file: &str, preview_file: PreviewFile) -> Result<()> {
        let Some(mut patch) = self.db.get_patch(patch_id)? else {
            return Ok(());
        };

        match patch.preview.files.iter_mut().find(|f| f.file == file) {
            Some(entry) => *entry = preview_file,
            None => patch.preview.files.push(preview_file),
        }

        patch.preview.unified_diff = patch
            .preview
            .files
            .iter()
            .filter(|f| f.ready && !f.unified_diff.is_empty())
            .map(|f| f.unified_diff.as_str())
            .collect::<Vec<_>>()
            .join("");

        let ready = patch.preview.files.iter().filter(|f| f.ready).count();
        let expected = patch.preview.files_expected as usize;
        self.db.save_patch_preview(patch_id, &patch.preview)?;

        if ready >= expected {
            self.db
                .transition_patch(patch_id, PatchStatus::PreviewReady, None)?;
            info!(patch_id, ready, "preview ready");
        } else {
            let elapsed_ms = (Utc::now() - patch.created_at).num_milliseconds().max(0) as u64;
            if ready >= self.config.preview_initial_max_files
                || elapsed_ms >= self.config.preview_time_budget_ms
            {
                self.db
                    .transition_patch(patch_id, PatchStatus::PreviewPartial, None)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_core::types::Severity;

    fn hunk(line: u32, original: &str, inserted: &str) -> Hunk {
        Hunk {
            finding_id: format!("f{line}"),
            rule: "r".into(),
            line,
            original: original.into(),
            inserted: inserted.into(),
            original_checksum: line_checksum(original),
            source: HunkSource::Deterministic,
            failed: false,
            reason: None,
            requires_async: false,
        }
    }

    #[test]
    fn skip_reasons_for_non_code_files() {
        assert_eq!(skip_reason("README.md"), Some("documentation"));
        assert_eq!(skip_reason("LICENSE"), Some("documentation"));
        assert_eq!(skip_reason("yarn.lock"), Some("lockfile"));
        assert_eq!(skip_reason(".gitignore"), Some("dotfile"));
        assert_eq!(skip_reason("vendor/app.min.js"), Some("minified"));
        assert_eq!(skip_reason("logo.png"), Some("binary_or_generated"));
        assert_eq!(skip_reason("src/app.js"), None);
        assert_eq!(skip_reason("Dockerfile"), None);
    }

    #[test]
    fn applies_hunks_bottom_up() {
        let mut lines: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let hunks = vec![hunk(1, "a", "A1\nA2"), hunk(3, "c", "C")];
        let (applied, skipped) = apply_hunks(&mut lines, &hunks, true, 10);
        assert_eq!(applied, vec!["f1".to_string(), "f3".to_string()]);
        assert!(skipped.is_empty());
        assert_eq!(lines, vec!["A1", "A2", "b", "C"]);
    }

    #[test]
    fn checksum_mismatch_skips_hunk() {
        let mut lines: Vec<String> = vec!["changed upstream".into()];
        let hunks = vec![hunk(1, "original text", "new")];
        let (applied, skipped) = apply_hunks(&mut lines, &hunks, true, 10);
        assert!(applied.is_empty());
        assert_eq!(skipped[0].reason, "checksum_mismatch");
        assert_eq!(lines, vec!["changed upstream"]);
    }

    #[test]
    fn without_verification_checksum_is_ignored() {
        let mut lines: Vec<String> = vec!["anything".into()];
        let hunks = vec![hunk(1, "original text", "new")];
        let (applied, _) = apply_hunks(&mut lines, &hunks, false, 10);
        assert_eq!(applied.len(), 1);
    }

    #[test]
    fn max_patches_cap_applies_in_line_order() {
        let mut lines: Vec<String> = (1..=4).map(|i| format!("l{i}")).collect();
        let hunks = vec![
            hunk(4, "l4", "x4"),
            hunk(1, "l1", "x1"),
            hunk(2, "l2", "x2"),
        ];
        let (applied, skipped) = apply_hunks(&mut lines, &hunks, true, 2);
        assert_eq!(applied, vec!["f1".to_string(), "f2".to_string()]);
        assert_eq!(skipped[0].line, 4);
        assert_eq!(skipped[0].reason, "max_patches_per_file");
    }

    #[tokio::test]
    async fn deterministic_preview_for_http_rewrite() {
        // Scenario: a deterministic transformer fixes the flagged line and the
        // preview wraps it in marker comments.
        let config = Arc::new(test_config());
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.migrate().unwrap();
        let router = Arc::new(Router::new(Vec::new(), Arc::new(peer_core::kv::KvStore::new()), &config));
        let engine = PreviewEngine::new(db, router, config);

        let mut finding = Finding::new(
            "app.js",
            1,
            "http-not-https",
            "heuristics",
            "heuristics",
            Severity::Medium,
            "Plaintext HTTP URL",
        );
        finding.id = "f1".into();

        let raw = "axios.get('http://api.example.com')\n";
        let preview = engine
            .build_preview_file("app.js", raw, &[finding], None)
            .await
            .unwrap();

        assert!(preview.ready);
        assert!(!preview.ai_rewritten);
        assert_eq!(preview.hunks.len(), 1);
        assert!(!preview.hunks[0].failed);
        let improved_lines: Vec<&str> = preview.improved_text.lines().collect();
        assert_eq!(improved_lines[0], "// peer:fix:begin http-not-https");
        assert_eq!(improved_lines[1], "// axios.get('http://api.example.com')");
        assert_eq!(improved_lines[2], "axios.get('https://api.example.com')");
        assert_eq!(improved_lines[3], "// peer:fix:end");
        assert!(preview.unified_diff.contains("+axios.get('https://api.example.com')"));
    }

    #[tokio::test]
    async fn crlf_input_is_detected_and_normalized() {
        let config = Arc::new(test_config());
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.migrate().unwrap();
        let router = Arc::new(Router::new(Vec::new(), Arc::new(peer_core::kv::KvStore::new()), &config));
        let engine = PreviewEngine::new(db, router, config);

        let mut finding = Finding::new("app.js", 1, "var-keyword", "javascript", "javascript", Severity::Low, "m");
        finding.id = "f1".into();

        let raw = "var a = 1\r\nvar b = 2\r\n";
        let preview = engine
            .build_preview_file("app.js", raw, &[finding], None)
            .await
            .unwrap();
        assert_eq!(preview.eol, Eol::CrLf);
        assert!(!preview.improved_text.contains('\r'));
        assert!(preview.improved_text.contains("let a = 1"));
    }

    fn test_config() -> Config {
        let mut config = Config::from_env().unwrap();
        config.llm_fix_mode = "auto".into();
        config.llm_strategy = String::new();
        config.encryption_key = String::new();
        config
    }

    // ── End-to-end preview flow over a local git origin ───────────────────

    use peer_core::git;
    use peer_core::types::{PatchRequest, PrRun};
    use tempfile::TempDir;

    async fn git_origin(files: &[(&str, &str)]) -> (TempDir, String, String) {
        let root = TempDir::new().unwrap();
        let repo = root.path().join("acme/widget.git");
        std::fs::create_dir_all(&repo).unwrap();
        for args in [
            vec!["init", "--quiet", "-b", "main"],
            vec!["config", "user.email", "t@t"],
            vec!["config", "user.name", "t"],
        ] {
            let r = git::exec(&repo, &args).await.unwrap();
            assert!(r.success(), "{}", r.combined_output());
        }
        for (name, contents) in files {
            let path = repo.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, contents).unwrap();
        }
        git::exec(&repo, &["add", "-A"]).await.unwrap();
        let r = git::exec(&repo, &["commit", "--quiet", "-m", "seed"]).await.unwrap();
        assert!(r.success(), "{}", r.combined_output());
        let sha = git::exec(&repo, &["rev-parse", "HEAD"])
            .await
            .unwrap()
            .stdout
            .trim()
            .to_string();
        let host_url = root.path().to_string_lossy().to_string();
        (root, host_url, sha)
    }

    fn seeded_patch(
        db: &Db,
        sha: &str,
        findings: Vec<Finding>,
        files: &[&str],
        user_id: Option<&str>,
    ) -> PatchRequest {
        let mut run = PrRun::new("acme/widget", 42, sha, None, "feature/x", 7);
        run.findings = findings;
        db.insert_run(&run).unwrap();
        let selected = run.findings.iter().map(|f| f.id.clone()).collect();
        let mut patch = PatchRequest::new(&run, user_id, selected);
        patch.preview.files = files.iter().map(|f| PreviewFile::pending(f)).collect();
        patch.preview.files_expected = files.len() as u32;
        db.insert_patch(&patch).unwrap();
        patch
    }

    fn named_finding(id: &str, file: &str, line: u32, rule: &str, severity: Severity) -> Finding {
        let mut f = Finding::new(file, line, rule, "heuristics", "heuristics", severity, "m");
        f.id = id.into();
        f
    }

    #[tokio::test]
    async fn files_processed_in_any_order_reach_preview_ready() {
        let (_origin, host_url, sha) = git_origin(&[
            ("app.js", "axios.get('http://api.example.com')\n"),
            ("README.md", "# readme\n"),
        ])
        .await;

        let mut config = test_config();
        config.git_host_url = host_url;
        config.github_token = String::new();
        let config = Arc::new(config);
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.migrate().unwrap();
        let router = Arc::new(Router::new(
            Vec::new(),
            Arc::new(peer_core::kv::KvStore::new()),
            &config,
        ));
        let engine = PreviewEngine::new(Arc::clone(&db), router, Arc::clone(&config));

        let findings = vec![named_finding(
            "f1",
            "app.js",
            1,
            "http-not-https",
            Severity::Medium,
        )];
        let patch = seeded_patch(&db, &sha, findings, &["app.js", "README.md"], None);

        // Arrival order is reversed relative to discovery order.
        engine.process_file(&patch.id, "README.md").await.unwrap();
        let partial = db.get_patch(&patch.id).unwrap().unwrap();
        assert_eq!(partial.status, PatchStatus::Queued);
        assert!(partial.preview.files[1].skipped);

        engine.process_file(&patch.id, "app.js").await.unwrap();
        let done = db.get_patch(&patch.id).unwrap().unwrap();
        assert_eq!(done.status, PatchStatus::PreviewReady);

        // Ready file count equals files_expected; ordering is discovery order.
        let ready = done.preview.files.iter().filter(|f| f.ready).count();
        assert_eq!(ready, done.preview.files_expected as usize);
        assert_eq!(done.preview.files[0].file, "app.js");
        assert_eq!(done.preview.files[1].file, "README.md");
        assert!(done.preview.files[0]
            .improved_text
            .contains("https://api.example.com"));
        assert!(done.preview.unified_diff.contains("+axios.get('https://api.example.com')"));

        // Redelivery of a finished file job is a no-op.
        engine.process_file(&patch.id, "app.js").await.unwrap();
        let again = db.get_patch(&patch.id).unwrap().unwrap();
        assert_eq!(again.status, PatchStatus::PreviewReady);
    }

    #[tokio::test]
    async fn quota_denial_fails_patch_and_notifies() {
        let (_origin, host_url, sha) =
            git_origin(&[("app.js", "db.query(\"SELECT * FROM users WHERE id=\" + id)\n")]).await;

        let mut config = test_config();
        config.git_host_url = host_url;
        let config = Arc::new(config);
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.migrate().unwrap();
        db.upsert_user(&User {
            id: "u1".into(),
            token_limit: 1000,
            tokens_used: 990,
            purchased_tokens: 0,
            api_keys: Default::default(),
        })
        .unwrap();
        let router = Arc::new(Router::new(
            Vec::new(),
            Arc::new(peer_core::kv::KvStore::new()),
            &config,
        ));
        let engine = PreviewEngine::new(Arc::clone(&db), router, Arc::clone(&config));

        // No deterministic transformer for this rule, so the model pass (and
        // the quota gate in front of it) is reached.
        let findings = vec![named_finding(
            "f1",
            "app.js",
            1,
            "sql-string-concat",
            Severity::High,
        )];
        let patch = seeded_patch(&db, &sha, findings, &["app.js"], Some("u1"));

        engine.process_file(&patch.id, "app.js").await.unwrap();

        let failed = db.get_patch(&patch.id).unwrap().unwrap();
        assert_eq!(failed.status, PatchStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("token_limit_exceeded"));
        let notes = db.list_notifications("u1").unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "token_limit_exceeded");
    }
}
