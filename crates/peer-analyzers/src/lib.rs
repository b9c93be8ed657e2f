use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::warn;

use peer_core::types::Finding;

pub mod ai;
pub mod docker;
pub mod golang;
pub mod heuristics;
pub mod iac;
pub mod javascript;
pub mod orchestrator;
pub mod python;
mod rules;
pub mod secrets;
pub mod shell;
pub mod tools;

/// A named, pluggable analyzer mapping `(workdir, changed_files)` to
/// findings. Contracts:
///   - never mutates the workdir;
///   - filters the candidate set to files it understands;
///   - skips unreadable files silently;
///   - emits `(file, line, rule)` uniquely within itself; cross-analyzer
///     duplicates are resolved by the orchestrator.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn analyze(&self, workdir: &Path, files: &[String]) -> Result<Vec<Finding>>;
}

/// Registry of all analyzers for a run.
pub struct Registry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl Registry {
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        Self { analyzers }
    }

    /// The standard battery: heuristics, language pattern matchers, secret
    /// scanning, Dockerfile/IaC rules, optional host tools, and (when a
    /// router is supplied) the AI analyzer.
    pub fn standard(router: Option<Arc<peer_llm::Router>>) -> Self {
        let mut analyzers: Vec<Arc<dyn Analyzer>> = vec![
            Arc::new(heuristics::Heuristics::new()),
            Arc::new(javascript::JavaScript::new()),
            Arc::new(python::Python::new()),
            Arc::new(golang::Golang::new()),
            Arc::new(shell::Shell::new()),
            Arc::new(secrets::Secrets::new()),
            Arc::new(docker::Dockerfile::new()),
            Arc::new(iac::Iac::new()),
        ];
        for adapter in tools::adapters() {
            analyzers.push(adapter);
        }
        if let Some(router) = router {
            analyzers.push(Arc::new(ai::AiAnalyzer::new(router)));
        }
        Self::new(analyzers)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    /// Run every analyzer concurrently. Each completes or fails
    /// independently; a failure yields `[]` with a warning and never
    /// propagates to the run.
    pub async fn run_all(&self, workdir: &Path, files: &[String]) -> Vec<Finding> {
        let mut set = JoinSet::new();
        for analyzer in &self.analyzers {
            let analyzer = Arc::clone(analyzer);
            let workdir = workdir.to_path_buf();
            let files = files.to_vec();
            set.spawn(async move {
                let name = analyzer.name();
                match analyzer.analyze(&workdir, &files).await {
                    Ok(findings) => (name, findings),
                    Err(e) => {
                        warn!(analyzer = name, "analyzer failed, dropping its findings: {e:#}");
                        (name, Vec::new())
                    }
                }
            });
        }

        let mut all = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, findings)) => all.extend(findings),
                Err(e) => warn!("analyzer task panicked: {e}"),
            }
        }
        all
    }
}

// ── Shared file helpers ───────────────────────────────────────────────────

/// Read a candidate file, skipping silently on any error (missing, binary,
/// permission) per the analyzer contract.
pub(crate) fn read_text(workdir: &Path, file: &str) -> Option<String> {
    std::fs::read_to_string(workdir.join(file)).ok()
}

pub(crate) fn extension(file: &str) -> &str {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

pub(crate) fn file_name(file: &str) -> &str {
    Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file)
}
