use std::path::Path;

/// Comment syntax family, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `// text` (also `#` and `--` variants).
    Line(&'static str),
    /// `/* text */`
    Block,
    /// `<!-- text -->`
    Html,
}

pub fn style_for(file: &str) -> CommentStyle {
    let ext = Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let name = Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name == "Dockerfile" || name.starts_with("Dockerfile.") {
        return CommentStyle::Line("#");
    }
    match ext.as_str() {
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "java" | "kt" | "go" | "rs" | "c" | "cc"
        | "cpp" | "h" | "hpp" | "cs" | "swift" | "scala" | "php" => CommentStyle::Line("//"),
        "py" | "rb" | "sh" | "bash" | "yaml" | "yml" | "toml" | "tf" | "dockerfile" | "r" => {
            CommentStyle::Line("#")
        }
        "sql" | "lua" => CommentStyle::Line("--"),
        "css" | "scss" | "less" => CommentStyle::Block,
        "html" | "htm" | "xml" | "svg" | "vue" | "md" | "markdown" => CommentStyle::Html,
        _ => CommentStyle::Line("//"),
    }
}

pub fn comment(style: CommentStyle, text: &str) -> String {
    match style {
        CommentStyle::Line(prefix) => format!("{prefix} {text}"),
        CommentStyle::Block => format!("/* {text} */"),
        CommentStyle::Html => format!("<!-- {} -->", text.replace("--", "- -")),
    }
}

/// Replacement fragment for a deterministic transform: BEGIN/END markers
/// framing the commented-out original, followed by the inserted line.
pub fn framed_fragment(style: CommentStyle, rule: &str, original: &str, inserted: &str) -> String {
    let indent: String = original
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();
    format!(
        "{indent}{}\n{indent}{}\n{inserted}\n{indent}{}",
        comment(style, &format!("peer:fix:begin {rule}")),
        comment(style, original.trim_start()),
        comment(style, "peer:fix:end"),
    )
}
