use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxVerdict {
    Passed,
    Failed(String),
    /// No checker for this language on the host; treated as passing.
    Unavailable,
}

/// Validate proposed file content with the host language runtime where one
/// exists (`node --check` for JS, `python3 -m py_compile` for Python).
/// LLM output that fails here is discarded rather than previewed.
pub async fn check(file: &str, content: &str) -> Result<SyntaxVerdict> {
    let ext = Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let (tool, args): (&str, Vec<&str>) = match ext {
        "js" | "mjs" | "cjs" => ("node", vec!["--check"]),
        "py" => ("python3", vec!["-m", "py_compile"]),
        _ => return Ok(SyntaxVerdict::Unavailable),
    };

    let dir = tempfile::TempDir::with_prefix("peer-syntax-")?;
    let name = Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("candidate");
    let tmp = dir.path().join(name);
    tokio::fs::write(&tmp, content).await?;

    let mut cmd = tokio::process::Command::new(tool);
    cmd.args(&args).arg(&tmp);
    let output = match tokio::time::timeout(Duration::from_secs(20), cmd.output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            debug!(tool, "syntax checker unavailable: {e}");
            return Ok(SyntaxVerdict::Unavailable);
        }
        Err(_) => {
            debug!(tool, "syntax checker timed out");
            return Ok(SyntaxVerdict::Unavailable);
        }
    };

    if output.status.success() {
        Ok(SyntaxVerdict::Passed)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Ok(SyntaxVerdict::Failed(
            stderr.lines().take(5).collect::<Vec<_>>().join("\n"),
        ))
    }
}
