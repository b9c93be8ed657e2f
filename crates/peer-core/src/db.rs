use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{
    ApplyResults, Finding, Installation, InstallationConfig, Notification, PatchRequest,
    PatchStatus, Preview, PrRun, RunStatus, Summary, User,
};

const SCHEMA_SQL: &str = include_str!("../../../schema.sql");

/// Insertion conflict on a unique key (duplicate `(repo, pr_number, sha)`).
/// Surfaced as a typed error so the webhook handler can answer "duplicate"
/// instead of 500.
#[derive(Debug)]
pub struct Conflict(pub String);

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conflict: {}", self.0)
    }
}

impl std::error::Error for Conflict {}

pub struct Db {
    conn: Mutex<Connection>,
}

// ── Timestamp helpers ─────────────────────────────────────────────────────

fn parse_ts(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ── Row mappers ───────────────────────────────────────────────────────────

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrRun> {
    let findings_json: String = row.get(8)?;
    let summary_json: String = row.get(9)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(PrRun {
        id: row.get(0)?,
        repo: row.get(1)?,
        pr_number: row.get(2)?,
        sha: row.get(3)?,
        base_sha: row.get(4)?,
        head_ref: row.get(5)?,
        installation_id: row.get(6)?,
        status: RunStatus::from_str(&status),
        findings: serde_json::from_str(&findings_json).unwrap_or_default(),
        summary: serde_json::from_str(&summary_json).unwrap_or_default(),
        error: row.get(10)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

const RUN_COLS: &str = "id, repo, pr_number, sha, base_sha, head_ref, installation_id, \
     status, findings, summary, error, created_at, updated_at";

fn row_to_patch(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatchRequest> {
    let selected_json: String = row.get(6)?;
    let status: String = row.get(7)?;
    let preview_json: String = row.get(8)?;
    let results_json: String = row.get(9)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(PatchRequest {
        id: row.get(0)?,
        run_id: row.get(1)?,
        repo: row.get(2)?,
        pr_number: row.get(3)?,
        sha: row.get(4)?,
        user_id: row.get(5)?,
        selected_finding_ids: serde_json::from_str(&selected_json).unwrap_or_default(),
        status: PatchStatus::from_str(&status),
        preview: serde_json::from_str(&preview_json).unwrap_or_default(),
        results: serde_json::from_str(&results_json).unwrap_or_default(),
        error: row.get(10)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

const PATCH_COLS: &str = "id, run_id, repo, pr_number, sha, user_id, selected_finding_ids, \
     status, preview, results, error, created_at, updated_at";

fn row_to_installation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Installation> {
    let config_json: String = row.get(2)?;
    let suspended: i64 = row.get(3)?;
    Ok(Installation {
        installation_id: row.get(0)?,
        repo: row.get(1)?,
        config: serde_json::from_str::<InstallationConfig>(&config_json).unwrap_or_default(),
        suspended: suspended != 0,
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let keys_json: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        token_limit: row.get(1)?,
        tokens_used: row.get(2)?,
        purchased_tokens: row.get(3)?,
        api_keys: serde_json::from_str(&keys_json).unwrap_or_default(),
    })
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let created_at: String = row.get(4)?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        message: row.get(3)?,
        created_at: parse_ts(&created_at),
    })
}

// ── Db impl ───────────────────────────────────────────────────────────────

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {path:?}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("failed to set PRAGMAs")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema migrations")?;
        Ok(())
    }

    // ── PRRun ─────────────────────────────────────────────────────────────

    /// Insert a run. A second run for the same `(repo, pr_number, sha)`
    /// fails with [`Conflict`].
    pub fn insert_run(&self, run: &PrRun) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let result = conn.execute(
            "INSERT INTO pr_runs (id, repo, pr_number, sha, base_sha, head_ref, \
             installation_id, status, findings, summary, error, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                run.id,
                run.repo,
                run.pr_number,
                run.sha,
                run.base_sha,
                run.head_ref,
                run.installation_id,
                run.status.as_str(),
                serde_json::to_string(&run.findings)?,
                serde_json::to_string(&run.summary)?,
                run.error,
                now_str(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Conflict(format!(
                    "run exists for {}#{} @ {}: {}",
                    run.repo,
                    run.pr_number,
                    run.sha,
                    msg.unwrap_or_default()
                ))
                .into())
            }
            Err(e) => Err(e).context("insert_run"),
        }
    }

    pub fn get_run(&self, id: &str) -> Result<Option<PrRun>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            &format!("SELECT {RUN_COLS} FROM pr_runs WHERE id = ?1"),
            params![id],
            row_to_run,
        )
        .optional()
        .context("get_run")
    }

    pub fn get_run_by_key(&self, repo: &str, pr_number: i64, sha: &str) -> Result<Option<PrRun>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            &format!(
                "SELECT {RUN_COLS} FROM pr_runs WHERE repo = ?1 AND pr_number = ?2 AND sha = ?3"
            ),
            params![repo, pr_number, sha],
            row_to_run,
        )
        .optional()
        .context("get_run_by_key")
    }

    pub fn list_runs(&self, repo: &str, pr_number: Option<i64>) -> Result<Vec<PrRun>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut runs = Vec::new();
        match pr_number {
            Some(pr) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLS} FROM pr_runs WHERE repo = ?1 AND pr_number = ?2 \
                     ORDER BY created_at DESC"
                ))?;
                let rows = stmt.query_map(params![repo, pr], row_to_run)?;
                for r in rows {
                    runs.push(r?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLS} FROM pr_runs WHERE repo = ?1 ORDER BY created_at DESC"
                ))?;
                let rows = stmt.query_map(params![repo], row_to_run)?;
                for r in rows {
                    runs.push(r?);
                }
            }
        }
        Ok(runs)
    }

    pub fn update_run_status(
        &self,
        id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE pr_runs SET status = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.as_str(), error, now_str()],
        )
        .context("update_run_status")?;
        Ok(())
    }

    pub fn set_run_results(
        &self,
        id: &str,
        findings: &[Finding],
        summary: &Summary,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE pr_runs SET findings = ?2, summary = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                id,
                serde_json::to_string(findings)?,
                serde_json::to_string(summary)?,
                now_str()
            ],
        )
        .context("set_run_results")?;
        Ok(())
    }

    /// Flip `fixed` on the given findings of a run. The autofix worker is the
    /// only caller, once per completed patch.
    pub fn mark_findings_fixed(
        &self,
        run_id: &str,
        finding_ids: &[String],
        patch_request_id: &str,
    ) -> Result<usize> {
        let Some(mut run) = self.get_run(run_id)? else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut flipped = 0;
        for f in &mut run.findings {
            if finding_ids.contains(&f.id) && !f.fixed {
                f.fixed = true;
                f.fixed_at = Some(now);
                f.fixed_by_patch_request_id = Some(patch_request_id.to_string());
                flipped += 1;
            }
        }
        self.set_run_results(run_id, &run.findings, &run.summary)?;
        Ok(flipped)
    }

    // ── PatchRequest ──────────────────────────────────────────────────────

    pub fn insert_patch(&self, patch: &PatchRequest) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO patch_requests (id, run_id, repo, pr_number, sha, user_id, \
             selected_finding_ids, status, preview, results, error, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                patch.id,
                patch.run_id,
                patch.repo,
                patch.pr_number,
                patch.sha,
                patch.user_id,
                serde_json::to_string(&patch.selected_finding_ids)?,
                patch.status.as_str(),
                serde_json::to_string(&patch.preview)?,
                serde_json::to_string(&patch.results)?,
                patch.error,
                now_str(),
            ],
        )
        .context("insert_patch")?;
        Ok(())
    }

    pub fn get_patch(&self, id: &str) -> Result<Option<PatchRequest>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            &format!("SELECT {PATCH_COLS} FROM patch_requests WHERE id = ?1"),
            params![id],
            row_to_patch,
        )
        .optional()
        .context("get_patch")
    }

    pub fn list_patches_for_run(&self, run_id: &str) -> Result<Vec<PatchRequest>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {PATCH_COLS} FROM patch_requests WHERE run_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![run_id], row_to_patch)?;
        let mut patches = Vec::new();
        for r in rows {
            patches.push(r?);
        }
        Ok(patches)
    }

    /// Find the patch request owning a fix branch (apply records the branch
    /// name in `results`).
    pub fn find_patch_by_branch(&self, repo: &str, branch: &str) -> Result<Option<PatchRequest>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(&format!(
            "SELECT {PATCH_COLS} FROM patch_requests WHERE repo = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![repo], row_to_patch)?;
        for r in rows {
            let patch = r?;
            if patch.results.branch_name == branch {
                return Ok(Some(patch));
            }
        }
        Ok(None)
    }

    /// Apply a status transition, enforcing monotonicity: an out-of-order
    /// write (e.g. a late progressive save after `preview_ready`) is
    /// silently dropped and reported as `false`.
    pub fn transition_patch(
        &self,
        id: &str,
        next: PatchStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let Some(current) = self.get_patch(id)? else {
            return Ok(false);
        };
        if current.status != next && !current.status.can_transition_to(next) {
            return Ok(false);
        }
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE patch_requests SET status = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, next.as_str(), error, now_str()],
        )
        .context("transition_patch")?;
        Ok(true)
    }

    pub fn save_patch_preview(&self, id: &str, preview: &Preview) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE patch_requests SET preview = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(preview)?, now_str()],
        )
        .context("save_patch_preview")?;
        Ok(())
    }

    pub fn save_patch_results(&self, id: &str, results: &ApplyResults) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE patch_requests SET results = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(results)?, now_str()],
        )
        .context("save_patch_results")?;
        Ok(())
    }

    // ── Installation ──────────────────────────────────────────────────────

    pub fn upsert_installation(&self, installation: &Installation) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO installations (installation_id, repo, config, suspended, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
             ON CONFLICT(installation_id) DO UPDATE SET \
             repo = excluded.repo, config = excluded.config, suspended = excluded.suspended, \
             updated_at = excluded.updated_at",
            params![
                installation.installation_id,
                installation.repo,
                serde_json::to_string(&installation.config)?,
                installation.suspended as i64,
                now_str(),
            ],
        )
        .context("upsert_installation")?;
        Ok(())
    }

    pub fn get_installation(&self, installation_id: i64) -> Result<Option<Installation>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT installation_id, repo, config, suspended FROM installations \
             WHERE installation_id = ?1",
            params![installation_id],
            row_to_installation,
        )
        .optional()
        .context("get_installation")
    }

    pub fn get_installation_by_repo(&self, repo: &str) -> Result<Option<Installation>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT installation_id, repo, config, suspended FROM installations \
             WHERE repo = ?1 AND suspended = 0 ORDER BY updated_at DESC LIMIT 1",
            params![repo],
            row_to_installation,
        )
        .optional()
        .context("get_installation_by_repo")
    }

    pub fn remove_installation(&self, installation_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "DELETE FROM installations WHERE installation_id = ?1",
            params![installation_id],
        )
        .context("remove_installation")?;
        Ok(())
    }

    // ── User ──────────────────────────────────────────────────────────────

    /// Load a user. `api_keys` values are the stored ciphertexts; callers
    /// decrypt through [`crate::crypto::KeyCipher`] before use.
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT id, token_limit, tokens_used, purchased_tokens, api_keys \
             FROM users WHERE id = ?1",
            params![id],
            row_to_user,
        )
        .optional()
        .context("get_user")
    }

    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO users (id, token_limit, tokens_used, purchased_tokens, api_keys, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET \
             token_limit = excluded.token_limit, tokens_used = excluded.tokens_used, \
             purchased_tokens = excluded.purchased_tokens, api_keys = excluded.api_keys",
            params![
                user.id,
                user.token_limit,
                user.tokens_used,
                user.purchased_tokens,
                serde_json::to_string(&user.api_keys)?,
                now_str(),
            ],
        )
        .context("upsert_user")?;
        Ok(())
    }

    pub fn add_tokens_used(&self, user_id: &str, tokens: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE users SET tokens_used = tokens_used + ?2 WHERE id = ?1",
            params![user_id, tokens],
        )
        .context("add_tokens_used")?;
        Ok(())
    }

    // ── Notification ──────────────────────────────────────────────────────

    pub fn insert_notification(&self, user_id: &str, kind: &str, message: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO notifications (user_id, kind, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, kind, message, now_str()],
        )
        .context("insert_notification")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, message, created_at FROM notifications \
             WHERE user_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_notification)?;
        let mut notifications = Vec::new();
        for r in rows {
            notifications.push(r?);
        }
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mode, Severity};

    fn db() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn sample_run() -> PrRun {
        PrRun::new("acme/widget", 42, "aaaa1111aaaa1111", Some("bbbb2222"), "feature/x", 7)
    }

    #[test]
    fn run_round_trip() {
        let db = db();
        let run = sample_run();
        db.insert_run(&run).unwrap();
        let loaded = db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(loaded.repo, "acme/widget");
        assert_eq!(loaded.pr_number, 42);
        assert_eq!(loaded.status, RunStatus::Queued);
        assert!(loaded.findings.is_empty());
    }

    #[test]
    fn duplicate_run_key_conflicts() {
        let db = db();
        let run = sample_run();
        db.insert_run(&run).unwrap();

        let mut second = sample_run();
        second.id = "run-other".into();
        let err = db.insert_run(&second).unwrap_err();
        assert!(err.downcast_ref::<Conflict>().is_some(), "{err:#}");
    }

    #[test]
    fn run_findings_and_fixed_flags() {
        let db = db();
        let run = sample_run();
        db.insert_run(&run).unwrap();

        let mut f = Finding::new("a.js", 10, "missing-await-async-call", "javascript", "javascript", Severity::High, "m");
        f.id = "f1".into();
        let summary = Summary::count(std::slice::from_ref(&f));
        db.set_run_results(&run.id, &[f], &summary).unwrap();

        let flipped = db
            .mark_findings_fixed(&run.id, &["f1".to_string()], "patch-1")
            .unwrap();
        assert_eq!(flipped, 1);
        let loaded = db.get_run(&run.id).unwrap().unwrap();
        assert!(loaded.findings[0].fixed);
        assert_eq!(
            loaded.findings[0].fixed_by_patch_request_id.as_deref(),
            Some("patch-1")
        );

        // Idempotent: already-fixed findings are not flipped twice.
        let again = db
            .mark_findings_fixed(&run.id, &["f1".to_string()], "patch-2")
            .unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn patch_transition_is_monotone() {
        let db = db();
        let run = sample_run();
        db.insert_run(&run).unwrap();
        let patch = PatchRequest::new(&run, None, vec!["f1".into()]);
        db.insert_patch(&patch).unwrap();

        assert!(db
            .transition_patch(&patch.id, PatchStatus::PreviewPartial, None)
            .unwrap());
        assert!(db
            .transition_patch(&patch.id, PatchStatus::PreviewReady, None)
            .unwrap());
        // Regression attempt is dropped.
        assert!(!db
            .transition_patch(&patch.id, PatchStatus::PreviewPartial, None)
            .unwrap());
        let loaded = db.get_patch(&patch.id).unwrap().unwrap();
        assert_eq!(loaded.status, PatchStatus::PreviewReady);
    }

    #[test]
    fn installation_upsert_and_lookup() {
        let db = db();
        let mut inst = Installation {
            installation_id: 7,
            repo: "acme/widget".into(),
            config: InstallationConfig::default(),
            suspended: false,
        };
        db.upsert_installation(&inst).unwrap();
        inst.config.mode = Mode::Merge;
        db.upsert_installation(&inst).unwrap();

        let loaded = db.get_installation_by_repo("acme/widget").unwrap().unwrap();
        assert_eq!(loaded.installation_id, 7);
        assert_eq!(loaded.config.mode, Mode::Merge);

        inst.suspended = true;
        db.upsert_installation(&inst).unwrap();
        assert!(db.get_installation_by_repo("acme/widget").unwrap().is_none());
    }

    #[test]
    fn user_tokens_and_notifications() {
        let db = db();
        let user = User {
            id: "u1".into(),
            token_limit: 1000,
            tokens_used: 0,
            purchased_tokens: 0,
            api_keys: Default::default(),
        };
        db.upsert_user(&user).unwrap();
        db.add_tokens_used("u1", 250).unwrap();
        assert_eq!(db.get_user("u1").unwrap().unwrap().tokens_used, 250);

        db.insert_notification("u1", "token_limit_exceeded", "quota exhausted")
            .unwrap();
        let notes = db.list_notifications("u1").unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "token_limit_exceeded");
    }

    #[test]
    fn patch_lookup_by_branch() {
        let db = db();
        let run = sample_run();
        db.insert_run(&run).unwrap();
        let mut patch = PatchRequest::new(&run, None, vec![]);
        patch.results.branch_name = "peer/autofix/run-1-123".into();
        db.insert_patch(&patch).unwrap();
        db.save_patch_results(&patch.id, &patch.results).unwrap();

        let found = db
            .find_patch_by_branch("acme/widget", "peer/autofix/run-1-123")
            .unwrap();
        assert_eq!(found.map(|p| p.id), Some(patch.id));
    }
}
