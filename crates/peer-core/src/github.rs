use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// The outbound host API surface the pipeline consumes, as a trait so the
/// auto-merge gate and workers can be exercised against a fake host.
#[async_trait]
pub trait HostApi: Send + Sync {
    async fn default_branch(&self, repo: &str) -> Result<String>;
    async fn get_pr(&self, repo: &str, number: i64) -> Result<PullRequest>;
    async fn list_pr_files(&self, repo: &str, number: i64) -> Result<Vec<PrFile>>;
    async fn list_reviews(&self, repo: &str, number: i64) -> Result<Vec<Review>>;
    async fn list_check_runs(&self, repo: &str, sha: &str) -> Result<Vec<CheckRun>>;
    async fn create_pr(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;
    async fn merge_pr(&self, repo: &str, number: i64, method: &str) -> Result<String>;
}

/// Concrete host client, acting as an installation.
#[derive(Clone)]
pub struct HostClient {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrRef {
    #[serde(default)]
    pub sha: String,
    #[serde(rename = "ref", default)]
    pub branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    #[serde(default)]
    pub html_url: String,
    /// `None` while the host is still computing mergeability.
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub head: PrRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrFile {
    pub filename: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunList {
    #[serde(default)]
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    sha: String,
    #[serde(default)]
    message: String,
}

impl HostClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("peer-pipeline")
            .build()
            .context("build host api client")?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET {path} returned {status}: {body}"));
        }
        resp.json::<T>().await.with_context(|| format!("decode {path}"))
    }
}

#[async_trait]
impl HostApi for HostClient {
    async fn default_branch(&self, repo: &str) -> Result<String> {
        let info: RepoInfo = self.get_json(&format!("/repos/{repo}")).await?;
        Ok(info.default_branch)
    }

    async fn get_pr(&self, repo: &str, number: i64) -> Result<PullRequest> {
        self.get_json(&format!("/repos/{repo}/pulls/{number}")).await
    }

    async fn list_pr_files(&self, repo: &str, number: i64) -> Result<Vec<PrFile>> {
        self.get_json(&format!("/repos/{repo}/pulls/{number}/files?per_page=100"))
            .await
    }

    async fn list_reviews(&self, repo: &str, number: i64) -> Result<Vec<Review>> {
        self.get_json(&format!("/repos/{repo}/pulls/{number}/reviews?per_page=100"))
            .await
    }

    async fn list_check_runs(&self, repo: &str, sha: &str) -> Result<Vec<CheckRun>> {
        let list: CheckRunList = self
            .get_json(&format!("/repos/{repo}/commits/{sha}/check-runs?per_page=100"))
            .await?;
        Ok(list.check_runs)
    }

    async fn create_pr(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let resp = self
            .client
            .post(self.url(&format!("/repos/{repo}/pulls")))
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .json(&json!({ "title": title, "head": head, "base": base, "body": body }))
            .send()
            .await
            .context("POST create pr")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("create pr on {repo} returned {status}: {body}"));
        }
        let pr: PullRequest = resp.json().await.context("decode create pr")?;
        info!(repo, number = pr.number, "created fix PR");
        Ok(pr)
    }

    /// Merge a PR. `method` is one of merge|squash|rebase. Returns the merge
    /// commit sha.
    async fn merge_pr(&self, repo: &str, number: i64, method: &str) -> Result<String> {
        let resp = self
            .client
            .put(self.url(&format!("/repos/{repo}/pulls/{number}/merge")))
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .json(&json!({ "merge_method": method }))
            .send()
            .await
            .context("PUT merge pr")?;
        let status = resp.status();
        let body: MergeResponse = if status.is_success() {
            resp.json().await.context("decode merge response")?
        } else {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("merge pr {repo}#{number} returned {status}: {text}"));
        };
        if !body.merged {
            return Err(anyhow!("merge pr {repo}#{number} refused: {}", body.message));
        }
        Ok(body.sha)
    }
}
