use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use peer_core::config::Config;
use peer_core::db::Db;
use peer_core::git::{clone_url, Workspace};
use peer_core::github::HostApi;
use peer_core::types::{ApplyResults, Eol, Mode, PatchRequest, PatchStatus};

use crate::merge_gate;
use crate::preview::apply_hunks;

/// Materializes a ready preview as a branch, commit, and (mode permitting)
/// a fix PR with optional auto-merge.
pub struct ApplyEngine {
    db: Arc<Db>,
    config: Arc<Config>,
    host: Arc<dyn HostApi>,
}

impl ApplyEngine {
    pub fn new(db: Arc<Db>, config: Arc<Config>, host: Arc<dyn HostApi>) -> Self {
        Self { db, config, host }
    }

    /// Handle one `apply` job. Partial success is the norm: per-file and
    /// per-hunk problems land in `results.skipped`/`results.errors`; the
    /// patch only fails when the push or PR creation fails.
    pub async fn process(&self, patch_id: &str) -> Result<()> {
        let Some(patch) = self.db.get_patch(patch_id)? else {
            warn!(patch_id, "apply job for unknown patch, dropping");
            return Ok(());
        };
        if matches!(patch.status, PatchStatus::Completed | PatchStatus::Failed) {
            return Ok(());
        }
        self.db
            .transition_patch(patch_id, PatchStatus::Applying, None)?;

        // Transient checkout problems propagate so the queue can retry the
        // job; everything after the workspace exists records outcomes.
        let url = clone_url(&self.config.git_host_url, &patch.repo, &self.config.github_token);
        let workspace = Workspace::checkout(&url, &patch.sha)
            .await
            .with_context(|| format!("checkout {} @ {}", patch.repo, patch.sha))?;

        let branch = format!("peer/autofix/{}-{}", patch.run_id, Utc::now().timestamp());
        workspace.create_branch(&branch).await?;

        let mut results = ApplyResults {
            branch_name: branch.clone(),
            ..Default::default()
        };

        self.write_fixes(&workspace, &patch, &mut results);

        let committed = workspace
            .commit_all(
                &format!(
                    "fix: automated review fixes for #{} ({} finding(s))",
                    patch.pr_number,
                    results.applied.len()
                ),
                (&self.config.git_author_name, &self.config.git_author_email),
            )
            .await?;

        if !committed || results.applied.is_empty() {
            info!(patch_id, "nothing to apply, completing without a PR");
            self.db.save_patch_results(patch_id, &results)?;
            self.db
                .transition_patch(patch_id, PatchStatus::Completed, None)?;
            return Ok(());
        }

        if let Err(e) = workspace.push(&branch).await {
            warn!(patch_id, branch, "push failed: {e:#}");
            results.errors.push(format!("push failed: {e:#}"));
            self.db.save_patch_results(patch_id, &results)?;
            self.db
                .transition_patch(patch_id, PatchStatus::Failed, Some("push_failed"))?;
            return Ok(());
        }
        results.commit_sha = workspace.head_sha().await.unwrap_or_default();

        let installation = self.db.get_installation_by_repo(&patch.repo)?;
        let mode = installation
            .as_ref()
            .map(|i| i.config.mode)
            .unwrap_or(Mode::Review);

        if matches!(mode, Mode::Commit | Mode::Merge) {
            let base = self
                .host
                .default_branch(&patch.repo)
                .await
                .unwrap_or_else(|e| {
                    warn!(repo = %patch.repo, "default branch lookup failed, assuming main: {e:#}");
                    "main".to_string()
                });
            let title = format!("Peer autofix for #{}", patch.pr_number);
            let body = Self::pr_body(&patch, &results);
            match self
                .host
                .create_pr(&patch.repo, &branch, &base, &title, &body)
                .await
            {
                Ok(pr) => {
                    results.fix_pr_number = Some(pr.number);
                    results.fix_pr_url = Some(pr.html_url.clone());

                    if mode == Mode::Merge {
                        let auto_merge = installation
                            .map(|i| i.config.auto_merge)
                            .unwrap_or_default();
                        let outcome = merge_gate::run_gate(
                            self.host.as_ref(),
                            &patch.repo,
                            pr.number,
                            &auto_merge,
                            &self.config.merge_method,
                        )
                        .await;
                        results.auto_merged = outcome.merged;
                        results.auto_merge_reason = Some(outcome.reason.clone());
                        if outcome.merged {
                            // Merged fixes cover the whole selection.
                            self.db.mark_findings_fixed(
                                &patch.run_id,
                                &patch.selected_finding_ids,
                                patch_id,
                            )?;
                        }
                    }
                }
                Err(e) => {
                    warn!(patch_id, "pr creation failed: {e:#}");
                    results.errors.push(format!("pr creation failed: {e:#}"));
                    self.db.save_patch_results(patch_id, &results)?;
                    self.db.transition_patch(
                        patch_id,
                        PatchStatus::Failed,
                        Some("pr_creation_failed"),
                    )?;
                    return Ok(());
                }
            }
        }

        self.db.save_patch_results(patch_id, &results)?;
        self.db
            .transition_patch(patch_id, PatchStatus::Completed, None)?;
        if !results.auto_merged {
            self.db
                .mark_findings_fixed(&patch.run_id, &results.applied, patch_id)?;
        }
        info!(
            patch_id,
            branch,
            applied = results.applied.len(),
            skipped = results.skipped.len(),
            "apply complete"
        );
        Ok(())
    }

    /// Write every prepared file into the fresh workspace: verbatim for AI
    /// rewrites, hunk-by-hunk with checksum verification otherwise.
    fn write_fixes(&self, workspace: &Workspace, patch: &PatchRequest, results: &mut ApplyResults) {
        for file in &patch.preview.files {
            if !file.ready || file.skipped {
                continue;
            }

            if file.ai_rewritten && !file.improved_text.is_empty() {
                let contents = file.eol.restore(&file.improved_text);
                match workspace.write_file(&file.file, &contents) {
                    Ok(()) => results.applied.extend(file.finding_ids.iter().cloned()),
                    Err(e) => results.errors.push(format!("{}: {e:#}", file.file)),
                }
                continue;
            }

            let current = match workspace.read_file(&file.file) {
                Ok(text) => text,
                Err(e) => {
                    results.errors.push(format!("{}: {e:#}", file.file));
                    continue;
                }
            };
            let eol = Eol::detect(&current);
            let normalized = current.replace("\r\n", "\n");
            let had_trailing_newline = normalized.ends_with('\n');
            let mut lines: Vec<String> = normalized.lines().map(str::to_string).collect();

            let (applied, mut skipped) = apply_hunks(
                &mut lines,
                &file.hunks,
                true,
                self.config.llm_max_patches_per_file,
            );
            for s in &mut skipped {
                s.file = file.file.clone();
            }
            results.skipped.extend(skipped);

            if applied.is_empty() {
                continue;
            }
            let mut text = lines.join("\n");
            if had_trailing_newline {
                text.push('\n');
            }
            match workspace.write_file(&file.file, &eol.restore(&text)) {
                Ok(()) => results.applied.extend(applied),
                Err(e) => results.errors.push(format!("{}: {e:#}", file.file)),
            }
        }
    }

    fn pr_body(patch: &PatchRequest, results: &ApplyResults) -> String {
        let mut body = format!(
            "Automated fixes for review findings on #{}.\n\nApplied: {} finding(s)\n",
            patch.pr_number,
            results.applied.len()
        );
        if !results.skipped.is_empty() {
            body.push_str(&format!("Skipped: {} hunk(s)\n", results.skipped.len()));
            for s in results.skipped.iter().take(10) {
                body.push_str(&format!("- {}:{} ({})\n", s.file, s.line, s.reason));
            }
        }
        body.push_str("\n---\nOpened by Peer autofix.");
        body
    }
}
