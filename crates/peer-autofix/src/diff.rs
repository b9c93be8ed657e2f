use similar::TextDiff;

/// Minimal unified diff (`---`/`+++` header, `@@` hunks) between the
/// original and improved text of one file.
pub fn unified_diff(path: &str, original: &str, improved: &str) -> String {
    if original == improved {
        return String::new();
    }
    TextDiff::from_lines(original, improved)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_input_has_empty_diff() {
        assert_eq!(unified_diff("a.js", "x\n", "x\n"), "");
    }

    #[test]
    fn diff_carries_header_and_hunks() {
        let d = unified_diff("src/a.js", "const a = 1\nconst b = 2\n", "const a = 1\nconst b = 3\n");
        assert!(d.starts_with("--- a/src/a.js\n+++ b/src/a.js\n"));
        assert!(d.contains("@@"));
        assert!(d.contains("-const b = 2"));
        assert!(d.contains("+const b = 3"));
    }
}
