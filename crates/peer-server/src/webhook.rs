use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use peer_core::db::Conflict;
use peer_core::types::{Installation, InstallationConfig, PrRun};

use crate::AppState;

pub const FIX_BRANCH_PREFIX: &str = "peer/autofix/";

// ── Signature ─────────────────────────────────────────────────────────────

/// Verify `sha256=<hex>` against HMAC-SHA256(body, secret). Length is gated
/// before the comparison and the comparison itself is constant-time
/// (`Mac::verify_slice`), so neither malformed nor near-miss signatures
/// leak timing.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    if hex_sig.len() != 64 {
        return false;
    }
    let Ok(signature) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

// ── Event envelope ────────────────────────────────────────────────────────

/// Parsed, validated webhook envelope. One variant per consumed event shape;
/// everything else becomes `Ignored` and goes no further than this parser.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    InstallationChange {
        installation_id: i64,
        repo: String,
        removed: bool,
    },
    PullRequest {
        repo: String,
        number: i64,
        head_sha: String,
        head_ref: String,
        base_sha: String,
        action: String,
    },
    ReviewApproved {
        repo: String,
        number: i64,
        head_ref: String,
    },
    Ignored {
        reason: String,
    },
}

#[derive(Deserialize)]
struct InstallationPayload {
    installation: InstallationRef,
    #[serde(default)]
    action: String,
    #[serde(default)]
    repositories: Vec<RepositoryRef>,
    repository: Option<RepositoryRef>,
}

#[derive(Deserialize)]
struct InstallationRef {
    id: i64,
}

#[derive(Deserialize)]
struct RepositoryRef {
    full_name: String,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    #[serde(default)]
    action: String,
    repository: RepositoryRef,
    pull_request: PullRequestRef,
}

#[derive(Deserialize)]
struct PullRequestRef {
    number: i64,
    head: CommitRef,
    base: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
    #[serde(rename = "ref", default)]
    branch: String,
}

#[derive(Deserialize)]
struct ReviewPayload {
    repository: RepositoryRef,
    pull_request: PullRequestRef,
    review: ReviewRef,
}

#[derive(Deserialize)]
struct ReviewRef {
    #[serde(default)]
    state: String,
}

/// Parse a named event body. Known event names with malformed bodies are a
/// contract violation (`Err` → 400); unknown event names are ignored.
pub fn parse_event(event_name: &str, body: &Value) -> Result<WebhookEvent> {
    match event_name {
        "installation" | "installation_repositories" => {
            let payload: InstallationPayload = serde_json::from_value(body.clone())
                .map_err(|e| anyhow!("malformed installation event: {e}"))?;
            let repo = payload
                .repositories
                .first()
                .map(|r| r.full_name.clone())
                .or(payload.repository.map(|r| r.full_name))
                .unwrap_or_default();
            Ok(WebhookEvent::InstallationChange {
                installation_id: payload.installation.id,
                repo,
                removed: matches!(payload.action.as_str(), "deleted" | "removed" | "suspend"),
            })
        }
        "pull_request" => {
            let payload: PullRequestPayload = serde_json::from_value(body.clone())
                .map_err(|e| anyhow!("malformed pull_request event: {e}"))?;
            Ok(WebhookEvent::PullRequest {
                repo: payload.repository.full_name,
                number: payload.pull_request.number,
                head_sha: payload.pull_request.head.sha,
                head_ref: payload.pull_request.head.branch,
                base_sha: payload.pull_request.base.sha,
                action: payload.action,
            })
        }
        "pull_request_review" => {
            let payload: ReviewPayload = serde_json::from_value(body.clone())
                .map_err(|e| anyhow!("malformed pull_request_review event: {e}"))?;
            if payload.review.state != "approved" {
                return Ok(WebhookEvent::Ignored {
                    reason: format!("review state {}", payload.review.state),
                });
            }
            Ok(WebhookEvent::ReviewApproved {
                repo: payload.repository.full_name,
                number: payload.pull_request.number,
                head_ref: payload.pull_request.head.branch,
            })
        }
        other => Ok(WebhookEvent::Ignored {
            reason: format!("event {other}"),
        }),
    }
}

// ── Handler ───────────────────────────────────────────────────────────────

pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> (StatusCode, Json<Value>) {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&state.config.webhook_secret, &body, signature) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "signature rejected" })),
        );
    }

    let event_name = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "invalid json" })),
            )
        }
    };

    let event = match parse_event(event_name, &parsed) {
        Ok(e) => e,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": format!("{e}") })),
            )
        }
    };

    match dispatch(&state, event).await {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(e) => {
            warn!("webhook dispatch failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "internal error" })),
            )
        }
    }
}

async fn dispatch(state: &Arc<AppState>, event: WebhookEvent) -> Result<Value> {
    match event {
        WebhookEvent::Ignored { reason } => {
            info!(reason, "webhook ignored");
            Ok(json!({ "status": "ignored" }))
        }

        WebhookEvent::InstallationChange {
            installation_id,
            repo,
            removed,
        } => {
            if removed {
                state.db.remove_installation(installation_id)?;
                info!(installation_id, "installation removed");
            } else {
                let existing = state.db.get_installation(installation_id)?;
                let installation = Installation {
                    installation_id,
                    repo: if repo.is_empty() {
                        existing.as_ref().map(|i| i.repo.clone()).unwrap_or_default()
                    } else {
                        repo
                    },
                    config: existing
                        .map(|i| i.config)
                        .unwrap_or_else(InstallationConfig::default),
                    suspended: false,
                };
                state.db.upsert_installation(&installation)?;
                info!(installation_id, "installation updated");
            }
            Ok(json!({ "status": "ok" }))
        }

        WebhookEvent::PullRequest {
            repo,
            number,
            head_sha,
            head_ref,
            base_sha,
            action,
        } => {
            if !matches!(action.as_str(), "opened" | "synchronize") {
                return Ok(json!({ "status": "ignored" }));
            }
            // Never analyze our own fix branches.
            if head_ref.starts_with(FIX_BRANCH_PREFIX) {
                return Ok(json!({ "status": "ignored", "reason": "autofix branch" }));
            }
            let Some(installation) = state.db.get_installation_by_repo(&repo)? else {
                info!(repo, "pull_request for repo without installation");
                return Ok(json!({ "status": "ignored", "reason": "no installation" }));
            };

            let run = PrRun::new(
                &repo,
                number,
                &head_sha,
                Some(&base_sha),
                &head_ref,
                installation.installation_id,
            );
            match state.db.insert_run(&run) {
                Ok(()) => {}
                Err(e) if e.downcast_ref::<Conflict>().is_some() => {
                    info!(repo, number, sha = %head_sha, "duplicate run rejected");
                    return Ok(json!({ "status": "duplicate" }));
                }
                Err(e) => return Err(e),
            }

            state
                .queues
                .put("analyze", json!({ "runId": run.id }))
                .await?;
            info!(repo, number, run_id = %run.id, "run queued");
            Ok(json!({ "status": "queued", "runId": run.id }))
        }

        WebhookEvent::ReviewApproved {
            repo,
            number,
            head_ref,
        } => {
            if !head_ref.starts_with(FIX_BRANCH_PREFIX) {
                return Ok(json!({ "status": "ignored" }));
            }
            let Some(patch) = state.db.find_patch_by_branch(&repo, &head_ref)? else {
                warn!(repo, head_ref, "approval for unknown fix branch");
                return Ok(json!({ "status": "ignored", "reason": "unknown branch" }));
            };

            let auto_merge = state
                .db
                .get_installation_by_repo(&repo)?
                .map(|i| i.config.auto_merge)
                .unwrap_or_default();
            let outcome = peer_autofix::merge_gate::run_gate(
                state.host.as_ref(),
                &repo,
                number,
                &auto_merge,
                &state.config.merge_method,
            )
            .await;

            let mut results = patch.results.clone();
            results.auto_merged = outcome.merged;
            results.auto_merge_reason = Some(outcome.reason.clone());
            state.db.save_patch_results(&patch.id, &results)?;
            if outcome.merged {
                state
                    .db
                    .mark_findings_fixed(&patch.run_id, &patch.selected_finding_ids, &patch.id)?;
            }
            Ok(json!({ "status": "ok", "merged": outcome.merged, "reason": outcome.reason }))
        }
    }
}
