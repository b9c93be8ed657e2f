use peer_core::types::Finding;
use peer_llm::{strip_code_fences, ChatRequest};

pub fn build_prompt(file: &str, content: &str, findings: &[Finding]) -> ChatRequest {
    let mut issue_list = String::new();
    for f in findings {
        issue_list.push_str(&format!(
            "- line {} [{}] {}: {}\n",
            f.line,
            f.severity.as_str(),
            f.rule,
            f.message
        ));
    }
    ChatRequest {
        system: "You rewrite source files to resolve code review findings. \
Respond with ONLY the complete corrected file content, no prose, no markdown fence. \
Change as little as possible beyond what the findings require, and keep the \
original formatting style."
            .to_string(),
        user: format!("File: {file}\n\nFindings:\n{issue_list}\nCurrent content:\n{content}"),
    }
}

/// Accept a proposed replacement only when it is non-empty after trimming
/// and actually differs from the input; anything else means the model
/// punted and the file is left alone.
pub fn accept(original: &str, proposed: &str) -> Option<String> {
    let cleaned = strip_code_fences(proposed).trim();
    if cleaned.is_empty() || cleaned == original.trim() {
        return None;
    }
    // Preserve the original's trailing-newline convention.
    let mut out = cleaned.to_string();
    if original.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_identical_output() {
        assert!(accept("const a = 1\n", "").is_none());
        assert!(accept("const a = 1\n", "   \n").is_none());
        assert!(accept("const a = 1\n", "const a = 1").is_none());
    }

    #[test]
    fn accepts_changed_output_and_restores_trailing_newline() {
        let out = accept("const a = 1\n", "const a = 2").unwrap();
        assert_eq!(out, "const a = 2\n");
    }

    #[test]
    fn strips_fences_before_judging() {
        let out = accept("const a = 1\n", "```javascript\nconst a = 2\n```").unwrap();
        assert_eq!(out, "const a = 2\n");
        assert!(accept("const a = 1\n", "```\nconst a = 1\n```").is_none());
    }
}
