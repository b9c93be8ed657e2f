use std::time::Duration;

use tracing::{info, warn};

use peer_core::github::HostApi;
use peer_core::types::AutoMergeConfig;

const MERGEABLE_RETRIES: u32 = 5;
const MERGEABLE_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub merged: bool,
    pub reason: String,
    pub merge_sha: Option<String>,
}

impl GateOutcome {
    fn refused(reason: &str) -> Self {
        Self {
            merged: false,
            reason: reason.to_string(),
            merge_sha: None,
        }
    }
}

/// Ordered auto-merge preconditions; the first failing one aborts with its
/// reason and the PR is left open.
///
///   1. auto-merge enabled for the installation
///   2. host reports the PR mergeable (retried while it is still computing)
///   3. when tests are required, every check run finished green
///   4. when reviews are required, enough approvals and no changes requested
///   5. the merge call itself
pub async fn run_gate(
    host: &dyn HostApi,
    repo: &str,
    pr_number: i64,
    auto_merge: &AutoMergeConfig,
    merge_method: &str,
) -> GateOutcome {
    if !auto_merge.enabled {
        return GateOutcome::refused("auto_merge_disabled");
    }

    // 2. Mergeability, with retries while the host is still computing.
    let mut head_sha = String::new();
    let mut mergeable = None;
    for attempt in 0..MERGEABLE_RETRIES {
        match host.get_pr(repo, pr_number).await {
            Ok(pr) => {
                head_sha = pr.head.sha.clone();
                if pr.merged {
                    return GateOutcome::refused("already_merged");
                }
                mergeable = pr.mergeable;
                if mergeable.is_some() {
                    break;
                }
            }
            Err(e) => {
                warn!(repo, pr_number, attempt, "get_pr failed during gate: {e:#}");
            }
        }
        tokio::time::sleep(MERGEABLE_RETRY_DELAY).await;
    }
    if mergeable != Some(true) {
        return GateOutcome::refused("not_mergeable");
    }

    // 3. Required status checks.
    if auto_merge.require_tests {
        match host.list_check_runs(repo, &head_sha).await {
            Ok(checks) => {
                let all_green = checks.iter().all(|c| {
                    c.status == "completed"
                        && matches!(
                            c.conclusion.as_deref(),
                            Some("success") | Some("skipped") | Some("neutral")
                        )
                });
                if !all_green {
                    return GateOutcome::refused("checks_failed");
                }
            }
            Err(e) => {
                warn!(repo, pr_number, "list_check_runs failed: {e:#}");
                return GateOutcome::refused("checks_failed");
            }
        }
    }

    // 4. Required reviews.
    if auto_merge.require_reviews >= 1 {
        match host.list_reviews(repo, pr_number).await {
            Ok(reviews) => {
                if reviews.iter().any(|r| r.state == "CHANGES_REQUESTED") {
                    return GateOutcome::refused("changes_requested");
                }
                let approvals = reviews.iter().filter(|r| r.state == "APPROVED").count() as u32;
                if approvals < auto_merge.require_reviews {
                    return GateOutcome::refused("insufficient_approvals");
                }
            }
            Err(e) => {
                warn!(repo, pr_number, "list_reviews failed: {e:#}");
                return GateOutcome::refused("insufficient_approvals");
            }
        }
    }

    // 5. Merge.
    match host.merge_pr(repo, pr_number, merge_method).await {
        Ok(sha) => {
            info!(repo, pr_number, merge_sha = %sha, "auto-merged fix PR");
            GateOutcome {
                merged: true,
                reason: "merged".to_string(),
                merge_sha: Some(sha),
            }
        }
        Err(e) => {
            warn!(repo, pr_number, "merge failed: {e:#}");
            GateOutcome::refused("merge_failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use peer_core::github::{CheckRun, PrFile, PrRef, PullRequest, Review};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHost {
        mergeable_sequence: Mutex<Vec<Option<bool>>>,
        checks: Vec<CheckRun>,
        reviews: Vec<Review>,
        merge_ok: bool,
        get_pr_calls: AtomicU32,
    }

    fn check(status: &str, conclusion: Option<&str>) -> CheckRun {
        CheckRun {
            name: "ci".into(),
            status: status.into(),
            conclusion: conclusion.map(str::to_string),
        }
    }

    fn review(state: &str) -> Review {
        Review {
            state: state.into(),
        }
    }

    #[async_trait]
    impl HostApi for FakeHost {
        async fn default_branch(&self, _repo: &str) -> Result<String> {
            Ok("main".into())
        }

        async fn get_pr(&self, _repo: &str, number: i64) -> Result<PullRequest> {
            self.get_pr_calls.fetch_add(1, Ordering::SeqCst);
            let mut seq = self.mergeable_sequence.lock().unwrap();
            let mergeable = if seq.is_empty() {
                Some(true)
            } else {
                seq.remove(0)
            };
            Ok(PullRequest {
                number,
                html_url: String::new(),
                mergeable,
                merged: false,
                head: PrRef {
                    sha: "headsha".into(),
                    branch: "peer/autofix/run-1-1".into(),
                },
            })
        }

        async fn list_pr_files(&self, _repo: &str, _number: i64) -> Result<Vec<PrFile>> {
            Ok(Vec::new())
        }

        async fn list_reviews(&self, _repo: &str, _number: i64) -> Result<Vec<Review>> {
            Ok(self.reviews.clone())
        }

        async fn list_check_runs(&self, _repo: &str, _sha: &str) -> Result<Vec<CheckRun>> {
            Ok(self.checks.clone())
        }

        async fn create_pr(
            &self,
            _repo: &str,
            _head: &str,
            _base: &str,
            _title: &str,
            _body: &str,
        ) -> Result<PullRequest> {
            anyhow::bail!("unused")
        }

        async fn merge_pr(&self, _repo: &str, _number: i64, _method: &str) -> Result<String> {
            if self.merge_ok {
                Ok("mergesha".into())
            } else {
                anyhow::bail!("refused")
            }
        }
    }

    fn gate_config(enabled: bool, require_tests: bool, require_reviews: u32) -> AutoMergeConfig {
        AutoMergeConfig {
            enabled,
            require_tests,
            require_reviews,
        }
    }

    #[tokio::test]
    async fn disabled_gate_short_circuits() {
        let host = FakeHost::default();
        let out = run_gate(&host, "acme/widget", 1, &gate_config(false, true, 1), "merge").await;
        assert_eq!(out, GateOutcome::refused("auto_merge_disabled"));
        assert_eq!(host.get_pr_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_check_refuses_with_checks_failed() {
        let host = FakeHost {
            checks: vec![
                check("completed", Some("success")),
                check("completed", Some("failure")),
            ],
            merge_ok: true,
            ..Default::default()
        };
        let out = run_gate(&host, "acme/widget", 1, &gate_config(true, true, 0), "merge").await;
        assert!(!out.merged);
        assert_eq!(out.reason, "checks_failed");
    }

    #[tokio::test]
    async fn skipped_and_neutral_conclusions_pass() {
        let host = FakeHost {
            checks: vec![
                check("completed", Some("success")),
                check("completed", Some("skipped")),
                check("completed", Some("neutral")),
            ],
            merge_ok: true,
            ..Default::default()
        };
        let out = run_gate(&host, "acme/widget", 1, &gate_config(true, true, 0), "merge").await;
        assert!(out.merged);
        assert_eq!(out.merge_sha.as_deref(), Some("mergesha"));
    }

    #[tokio::test]
    async fn pending_check_is_not_green() {
        let host = FakeHost {
            checks: vec![check("in_progress", None)],
            merge_ok: true,
            ..Default::default()
        };
        let out = run_gate(&host, "acme/widget", 1, &gate_config(true, true, 0), "merge").await;
        assert_eq!(out.reason, "checks_failed");
    }

    #[tokio::test]
    async fn changes_requested_blocks_merge() {
        let host = FakeHost {
            reviews: vec![review("APPROVED"), review("CHANGES_REQUESTED")],
            merge_ok: true,
            ..Default::default()
        };
        let out = run_gate(&host, "acme/widget", 1, &gate_config(true, false, 1), "merge").await;
        assert_eq!(out.reason, "changes_requested");
    }

    #[tokio::test]
    async fn approval_count_is_enforced() {
        let host = FakeHost {
            reviews: vec![review("APPROVED")],
            merge_ok: true,
            ..Default::default()
        };
        let out = run_gate(&host, "acme/widget", 1, &gate_config(true, false, 2), "merge").await;
        assert_eq!(out.reason, "insufficient_approvals");
    }

    #[tokio::test]
    async fn null_mergeable_is_retried_then_merges() {
        let host = FakeHost {
            mergeable_sequence: Mutex::new(vec![None, None, Some(true)]),
            merge_ok: true,
            ..Default::default()
        };
        let out = run_gate(&host, "acme/widget", 1, &gate_config(true, false, 0), "merge").await;
        assert!(out.merged);
        assert_eq!(host.get_pr_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unmergeable_pr_is_refused() {
        let host = FakeHost {
            mergeable_sequence: Mutex::new(vec![Some(false)]),
            merge_ok: true,
            ..Default::default()
        };
        let out = run_gate(&host, "acme/widget", 1, &gate_config(true, false, 0), "merge").await;
        assert_eq!(out.reason, "not_mergeable");
    }
}
