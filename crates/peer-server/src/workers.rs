use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use tracing::{info, warn};

use peer_analyzers::orchestrator;
use peer_analyzers::Registry;
use peer_core::config::Config;
use peer_core::db::Db;
use peer_core::git::{clone_url, Workspace};
use peer_core::kv::KvStore;
use peer_core::queue::{Job, JobQueue};
use peer_core::types::{
    InstallationConfig, PatchRequest, PatchStatus, PreviewFile, PrRun, RunStatus, Summary,
};
use peer_autofix::apply::ApplyEngine;
use peer_autofix::preview::PreviewEngine;

const LOCATE_ATTEMPTS: u32 = 5;
const LOCATE_BASE_DELAY: Duration = Duration::from_millis(100);

/// Everything the queue workers need. Handlers are idempotent against their
/// target entity, so at-least-once delivery is safe.
pub struct WorkerContext {
    pub db: Arc<Db>,
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub queues: Arc<JobQueue>,
    pub kv: Arc<KvStore>,
    pub preview: Arc<PreviewEngine>,
    pub apply: Arc<ApplyEngine>,
}

/// Register the three pipeline queues with their handlers.
pub async fn register(ctx: Arc<WorkerContext>) {
    let queues = Arc::clone(&ctx.queues);

    let analyze_ctx = Arc::clone(&ctx);
    queues
        .register(
            "analyze",
            ctx.config.analyze_concurrency,
            ctx.config.queue_max_retries,
            ctx.config.queue_retry_base_ms,
            move |job| {
                let ctx = Arc::clone(&analyze_ctx);
                async move { handle_analyze(ctx, job).await }
            },
        )
        .await;

    let autofix_ctx = Arc::clone(&ctx);
    queues
        .register(
            "autofix",
            ctx.config.autofix_concurrency,
            ctx.config.queue_max_retries,
            ctx.config.queue_retry_base_ms,
            move |job| {
                let ctx = Arc::clone(&autofix_ctx);
                async move { handle_preview_file(ctx, job).await }
            },
        )
        .await;

    let apply_ctx = Arc::clone(&ctx);
    queues
        .register(
            "apply",
            ctx.config.apply_concurrency,
            ctx.config.queue_max_retries,
            ctx.config.queue_retry_base_ms,
            move |job| {
                let ctx = Arc::clone(&apply_ctx);
                async move { handle_apply(ctx, job).await }
            },
        )
        .await;
}

fn payload_str(job: &Job, key: &str) -> Result<String> {
    job.payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("job payload missing {key}"))
}

/// The run row may be milliseconds fresh when the job fires; retry the
/// lookup with exponential backoff before giving up.
async fn locate_run(db: &Db, run_id: &str) -> Result<PrRun> {
    for attempt in 0..LOCATE_ATTEMPTS {
        if let Some(run) = db.get_run(run_id)? {
            return Ok(run);
        }
        tokio::time::sleep(LOCATE_BASE_DELAY * 2u32.pow(attempt)).await;
    }
    Err(anyhow!("run {run_id} not found after {LOCATE_ATTEMPTS} attempts"))
}

fn installation_config(ctx: &WorkerContext, run: &PrRun) -> InstallationConfig {
    ctx.db
        .get_installation(run.installation_id)
        .ok()
        .flatten()
        .or_else(|| ctx.db.get_installation_by_repo(&run.repo).ok().flatten())
        .map(|i| i.config)
        .unwrap_or_default()
}

// ── analyze ───────────────────────────────────────────────────────────────

pub async fn handle_analyze(ctx: Arc<WorkerContext>, job: Job) -> Result<()> {
    let run_id = payload_str(&job, "runId")?;
    let run = locate_run(&ctx.db, &run_id).await?;

    // Idempotency against redelivery: a finished run is never re-analyzed.
    if matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
        info!(run_id, "run already finished, dropping analyze job");
        return Ok(());
    }
    if run.status.can_transition_to(RunStatus::Running) {
        ctx.db.update_run_status(&run_id, RunStatus::Running, None)?;
    }

    match analyze_run(&ctx, &run).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(run_id, "analysis failed: {e:#}");
            ctx.db
                .update_run_status(&run_id, RunStatus::Failed, Some(&format!("{e:#}")))?;
            Err(e)
        }
    }
}

async fn analyze_run(ctx: &WorkerContext, run: &PrRun) -> Result<()> {
    let install_config = installation_config(ctx, run);

    let url = clone_url(&ctx.config.git_host_url, &run.repo, &ctx.config.github_token);
    let workspace = Workspace::checkout(&url, &run.sha)
        .await
        .with_context(|| format!("checkout {} @ {}", run.repo, run.sha))?;

    let mut changed = workspace.changed_files(run.base_sha.as_deref()).await?;
    if changed.len() > install_config.max_files_per_run as usize {
        warn!(
            run_id = %run.id,
            total = changed.len(),
            cap = install_config.max_files_per_run,
            "change set exceeds per-run file cap, truncating"
        );
        changed.truncate(install_config.max_files_per_run as usize);
    }

    let raw = ctx.registry.run_all(workspace.path(), &changed).await;
    let orchestrated = orchestrator::orchestrate(raw);

    let findings: Vec<_> = orchestrated
        .findings
        .into_iter()
        .filter(|f| install_config.retains(f.severity))
        .collect();
    let summary = Summary::count(&findings);

    ctx.db.set_run_results(&run.id, &findings, &summary)?;
    ctx.db
        .update_run_status(&run.id, RunStatus::Completed, None)?;
    info!(
        run_id = %run.id,
        files = changed.len(),
        findings = findings.len(),
        critical = summary.critical,
        high = summary.high,
        "analysis complete"
    );

    // Mode-driven autofix: queue a patch covering every finding.
    if install_config.mode.auto_fix() && !findings.is_empty() {
        let selected: Vec<String> = findings.iter().map(|f| f.id.clone()).collect();
        let mut patch = PatchRequest::new(run, None, selected);

        // Discovery order: files as they first appear in the ranked list.
        let mut files: Vec<String> = Vec::new();
        for f in &findings {
            if !files.contains(&f.file) {
                files.push(f.file.clone());
            }
        }
        patch.preview.files = files.iter().map(|f| PreviewFile::pending(f)).collect();
        patch.preview.files_expected = files.len() as u32;

        ctx.db.insert_patch(&patch)?;
        for file in &files {
            ctx.queues
                .put(
                    "autofix",
                    json!({ "patchRequestId": patch.id, "file": file }),
                )
                .await?;
        }
        info!(patch_id = %patch.id, files = files.len(), "autofix previews queued");
    }

    Ok(())
}

// ── autofix (per-file preview) ────────────────────────────────────────────

pub async fn handle_preview_file(ctx: Arc<WorkerContext>, job: Job) -> Result<()> {
    let patch_id = payload_str(&job, "patchRequestId")?;
    let file = payload_str(&job, "file")?;

    ctx.preview.process_file(&patch_id, &file).await?;

    // When the last file lands and the installation auto-applies, queue the
    // apply exactly once (file jobs finish in arbitrary order, so several
    // may observe preview_ready).
    let Some(patch) = ctx.db.get_patch(&patch_id)? else {
        return Ok(());
    };
    if patch.status != PatchStatus::PreviewReady {
        return Ok(());
    }
    let auto = ctx
        .db
        .get_installation_by_repo(&patch.repo)?
        .map(|i| i.config.mode.auto_fix())
        .unwrap_or(false);
    if !auto {
        return Ok(());
    }

    let once_key = format!("apply:queued:{patch_id}");
    if ctx.kv.get(&once_key).is_some() {
        return Ok(());
    }
    ctx.kv.set(&once_key, "1");
    ctx.queues
        .put("apply", json!({ "patchRequestId": patch_id }))
        .await?;
    info!(patch_id, "apply queued");
    Ok(())
}

// ── apply ─────────────────────────────────────────────────────────────────

pub async fn handle_apply(ctx: Arc<WorkerContext>, job: Job) -> Result<()> {
    let patch_id = payload_str(&job, "patchRequestId")?;
    ctx.apply.process(&patch_id).await
}
