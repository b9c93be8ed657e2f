use std::collections::HashSet;

use serde::Deserialize;
use tracing::warn;

use peer_core::types::{Finding, Hunk, HunkSource};
use peer_llm::{strip_code_fences, ChatRequest};

use crate::comment::{comment, style_for, CommentStyle};
use crate::line_checksum;

/// One line-scoped patch proposed by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct MinimalPatch {
    #[serde(rename = "findingId", default)]
    pub finding_id: String,
    pub line: u32,
    #[serde(rename = "newCode")]
    pub new_code: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub warn: Option<String>,
    /// `"multi"` when the model deliberately emitted a multi-line patch.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl MinimalPatch {
    pub fn is_multi_line(&self) -> bool {
        self.new_code.contains('\n')
    }

    fn flagged_multi(&self) -> bool {
        matches!(self.kind.as_deref(), Some("multi") | Some("multi_line") | Some("multiline"))
    }
}

pub fn build_prompt(file: &str, content: &str, findings: &[Finding]) -> ChatRequest {
    let mut issue_list = String::new();
    for f in findings {
        issue_list.push_str(&format!(
            "- id={} line={} rule={} severity={}: {}\n",
            f.id,
            f.line,
            f.rule,
            f.severity.as_str(),
            f.message
        ));
    }
    let numbered: String = content
        .lines()
        .enumerate()
        .map(|(i, l)| format!("{:>4} | {l}\n", i + 1))
        .collect();

    ChatRequest {
        system: "You fix code review findings with the smallest possible patches. \
Respond with ONLY a JSON array where each element is \
{\"findingId\": string, \"line\": number, \"newCode\": string, \"reason\": string, \
\"warn\": string optional, \"type\": \"multi\" only when newCode intentionally spans lines}. \
newCode is the full replacement for that one line, without the line number prefix. \
Emit single-line patches; never rewrite code that has no finding."
            .to_string(),
        user: format!("File: {file}\n\nFindings:\n{issue_list}\nSource:\n{numbered}"),
    }
}

pub fn parse_patches(text: &str) -> Vec<MinimalPatch> {
    let body = strip_code_fences(text);
    match serde_json::from_str::<Vec<MinimalPatch>>(body) {
        Ok(patches) => patches,
        Err(e) => {
            warn!("minimal-patch output was not parseable json: {e}");
            Vec::new()
        }
    }
}

pub struct PatchPolicy {
    pub max_patches_per_file: usize,
    pub allow_multiline: bool,
}

/// Convert parsed patches into hunks against the original lines.
///
/// Patches addressing lines outside `1..=len` are discarded outright (never
/// recorded), so every surviving hunk satisfies the line-bounds invariant.
/// Per-file caps and the multi-line gate record failed hunks with a
/// structured reason instead.
pub fn hunks_from_patches(
    file: &str,
    original_lines: &[String],
    patches: Vec<MinimalPatch>,
    taken_lines: &HashSet<u32>,
    policy: &PatchPolicy,
) -> Vec<Hunk> {
    let style = style_for(file);
    let mut hunks = Vec::new();
    let mut used_lines: HashSet<u32> = taken_lines.clone();
    let mut accepted = 0usize;

    for patch in patches {
        if patch.line < 1 || patch.line as usize > original_lines.len() {
            warn!(
                file,
                line = patch.line,
                "model patch outside the file, discarding"
            );
            continue;
        }
        let original = original_lines[patch.line as usize - 1].clone();
        let mut hunk = Hunk {
            finding_id: patch.finding_id.clone(),
            rule: String::new(),
            line: patch.line,
            original: original.clone(),
            inserted: String::new(),
            original_checksum: line_checksum(&original),
            source: HunkSource::Llm,
            failed: false,
            reason: None,
            requires_async: false,
        };

        if used_lines.contains(&patch.line) {
            hunk.failed = true;
            hunk.reason = Some("line_already_patched".to_string());
            hunks.push(hunk);
            continue;
        }
        if patch.is_multi_line() && !(patch.flagged_multi() && policy.allow_multiline) {
            hunk.failed = true;
            hunk.reason = Some("multi_line_not_allowed".to_string());
            hunks.push(hunk);
            continue;
        }
        if accepted >= policy.max_patches_per_file {
            hunk.failed = true;
            hunk.reason = Some("max_patches_per_file".to_string());
            hunks.push(hunk);
            continue;
        }

        hunk.inserted = render_fragment(style, &patch, &original);
        hunk.reason = Some(patch.reason.clone());
        used_lines.insert(patch.line);
        accepted += 1;
        hunks.push(hunk);
    }
    hunks
}

/// `newCode // FIX: reason`, then the original behind an `OLD:` comment,
/// then an optional `WARN:` comment.
fn render_fragment(style: CommentStyle, patch: &MinimalPatch, original: &str) -> String {
    let indent: String = original
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();
    let reason = if patch.reason.is_empty() {
        "automated fix"
    } else {
        patch.reason.as_str()
    };
    let mut fragment = format!(
        "{} {}\n{indent}{}",
        patch.new_code.trim_end(),
        comment(style, &format!("FIX: {reason}")),
        comment(style, &format!("OLD: {}", original.trim_start())),
    );
    if let Some(ref warn_text) = patch.warn {
        if !warn_text.is_empty() {
            fragment.push('\n');
            fragment.push_str(&indent);
            fragment.push_str(&comment(style, &format!("WARN: {warn_text}")));
        }
    }
    fragment
}
