//! Operational CLI: run the full analyze+summarize pipeline over a local
//! checkout, without a server or webhook in sight.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use peer_analyzers::orchestrator::{orchestrate, Orchestrated};
use peer_analyzers::Registry;
use peer_core::config::Config;
use peer_core::git;
use peer_core::kv::KvStore;
use peer_llm::provider::default_providers;

#[derive(Parser, Debug)]
#[command(
    name = "peer-analyze",
    about = "Analyze a local checkout and emit a findings report"
)]
struct Cli {
    /// Repository checkout to analyze.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Base revision; files changed in base..head are analyzed.
    #[arg(long)]
    base: Option<String>,

    /// Head revision (defaults to HEAD).
    #[arg(long, default_value = "HEAD")]
    head: String,

    /// Analyze every tracked file instead of a revision range.
    #[arg(long)]
    all_files: bool,

    /// json, markdown, or both.
    #[arg(long, default_value = "both")]
    format: String,

    /// Write report files with this path prefix instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Include the AI analyzer (needs provider credentials).
    #[arg(long)]
    ai: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env()?;

    let files = if cli.all_files {
        tracked_files(&cli.dir).await?
    } else {
        changed_files(&cli.dir, cli.base.as_deref(), &cli.head).await?
    };
    info!(files = files.len(), "candidate files");

    let router = if cli.ai {
        Some(Arc::new(peer_llm::Router::new(
            default_providers(&config),
            Arc::new(KvStore::new()),
            &config,
        )))
    } else {
        None
    };
    let registry = Registry::standard(router);

    let raw = registry.run_all(&cli.dir, &files).await;
    let result = orchestrate(raw);

    let emit_json = matches!(cli.format.as_str(), "json" | "both");
    let emit_md = matches!(cli.format.as_str(), "markdown" | "md" | "both");

    if emit_json {
        let report = serde_json::to_string_pretty(&serde_json::json!({
            "summary": result.summary,
            "findings": result.findings,
        }))?;
        match &cli.out {
            Some(prefix) => {
                let path = prefix.with_extension("json");
                std::fs::write(&path, &report)
                    .with_context(|| format!("write {}", path.display()))?;
                println!("wrote {}", path.display());
            }
            None => println!("{report}"),
        }
    }

    if emit_md {
        let md = markdown_summary(&result);
        match &cli.out {
            Some(prefix) => {
                let path = prefix.with_extension("md");
                std::fs::write(&path, &md).with_context(|| format!("write {}", path.display()))?;
                println!("wrote {}", path.display());
            }
            None => println!("{md}"),
        }
    }

    Ok(())
}

async fn changed_files(dir: &PathBuf, base: Option<&str>, head: &str) -> Result<Vec<String>> {
    let range = match base {
        Some(base) => format!("{base}..{head}"),
        None => format!("{head}~1..{head}"),
    };
    let diff = git::exec(dir, &["diff", "--name-only", &range]).await?;
    if diff.success() {
        return Ok(split(&diff.stdout));
    }
    // Single-commit repositories have no parent to diff against.
    let show = git::exec(dir, &["show", "--name-only", "--format=", head]).await?;
    if show.success() {
        return Ok(split(&show.stdout));
    }
    anyhow::bail!("git diff {range} failed: {}", diff.combined_output());
}

async fn tracked_files(dir: &PathBuf) -> Result<Vec<String>> {
    let out = git::exec(dir, &["ls-files"]).await?;
    if !out.success() {
        anyhow::bail!("git ls-files failed: {}", out.combined_output());
    }
    Ok(split(&out.stdout))
}

fn split(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn markdown_summary(result: &Orchestrated) -> String {
    let mut md = String::from("# Peer analysis report\n\n");
    md.push_str(&format!(
        "| Severity | Count |\n|---|---|\n| critical | {} |\n| high | {} |\n| medium | {} |\n| low | {} |\n\n",
        result.summary.critical, result.summary.high, result.summary.medium, result.summary.low,
    ));
    if result.findings.is_empty() {
        md.push_str("No findings.\n");
        return md;
    }
    md.push_str("## Findings\n\n");
    for f in &result.findings {
        md.push_str(&format!(
            "- **{}** `{}` {}:{} — {}\n",
            f.severity.as_str(),
            f.rule,
            f.file,
            f.line,
            f.message
        ));
        if !f.suggestion.is_empty() {
            md.push_str(&format!("  - suggestion: {}\n", f.suggestion));
        }
    }
    md
}
