pub mod cache;
pub mod complexity;
pub mod provider;
pub mod quota;
pub mod router;

pub use complexity::Complexity;
pub use provider::{ChatRequest, ChatResponse, Provider};
pub use quota::QuotaExceeded;
pub use router::{RouteOptions, Router};

/// Strip a surrounding markdown code fence from model output, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("javascript"))
        .or_else(|| rest.strip_prefix("python"))
        .unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fences_plain() {
        assert_eq!(strip_code_fences(r#"{"a":1}"#), r#"{"a":1}"#);
    }

    #[test]
    fn strip_fences_with_language_tag() {
        assert_eq!(strip_code_fences("```json\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_code_fences("```\ncode\n```"), "code");
    }
}
