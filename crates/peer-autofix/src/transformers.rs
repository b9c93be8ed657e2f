use regex::Regex;

/// Output of a deterministic transformer: the replacement for one line.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub inserted_line: String,
    /// The transformer only operates on its line; when the fix needs the
    /// enclosing function made async, it requests it and the engine edits
    /// the declaration.
    pub requires_async: bool,
    pub reason: &'static str,
}

/// A single-rule, single-line rewriter.
pub struct Transformer {
    pub rule: &'static str,
    apply: fn(&str) -> Option<Transformed>,
}

impl Transformer {
    pub fn apply(&self, line: &str) -> Option<Transformed> {
        (self.apply)(line)
    }
}

fn re(pattern: &str) -> Regex {
    #[allow(clippy::expect_used)]
    Regex::new(pattern).expect("static transformer pattern must compile")
}

fn http_to_https(line: &str) -> Option<Transformed> {
    if !line.contains("http://") {
        return None;
    }
    Some(Transformed {
        inserted_line: line.replace("http://", "https://"),
        requires_async: false,
        reason: "use https for external endpoints",
    })
}

fn add_await(line: &str) -> Option<Transformed> {
    let call = re(r"(fetch|axios\.(?:get|post|put|patch|delete|request))\s*\(");
    if line.contains("await ") || !call.is_match(line) {
        return None;
    }
    let inserted = call.replace(line, "await $0").into_owned();
    Some(Transformed {
        inserted_line: inserted,
        requires_async: true,
        reason: "await async call",
    })
}

fn var_to_let(line: &str) -> Option<Transformed> {
    let var = re(r"^(\s*)var\s+");
    if !var.is_match(line) {
        return None;
    }
    Some(Transformed {
        inserted_line: var.replace(line, "${1}let ").into_owned(),
        requires_async: false,
        reason: "block-scoped binding",
    })
}

fn strict_equality(line: &str) -> Option<Transformed> {
    let loose_eq = re(r"([^=!<>])==([^=])");
    let loose_ne = re(r"([^!])!=([^=])");
    if !loose_eq.is_match(line) && !loose_ne.is_match(line) {
        return None;
    }
    let step = loose_eq.replace_all(line, "${1}===${2}").into_owned();
    let inserted = loose_ne.replace_all(&step, "${1}!==${2}").into_owned();
    Some(Transformed {
        inserted_line: inserted,
        requires_async: false,
        reason: "strict equality avoids type coercion",
    })
}

fn drop_console_log(line: &str) -> Option<Transformed> {
    if !line.contains("console.") {
        return None;
    }
    let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
    Some(Transformed {
        inserted_line: format!("{indent}// {}", line.trim_start()),
        requires_async: false,
        reason: "debug logging removed",
    })
}

fn yaml_safe_load(line: &str) -> Option<Transformed> {
    if !line.contains("yaml.load(") {
        return None;
    }
    Some(Transformed {
        inserted_line: line.replace("yaml.load(", "yaml.safe_load("),
        requires_async: false,
        reason: "safe_load refuses arbitrary object construction",
    })
}

fn shell_false(line: &str) -> Option<Transformed> {
    if !line.contains("shell=True") {
        return None;
    }
    Some(Transformed {
        inserted_line: line.replace("shell=True", "shell=False"),
        requires_async: false,
        reason: "avoid shell interpolation of arguments",
    })
}

fn drop_debugger(line: &str) -> Option<Transformed> {
    if !line.trim_start().starts_with("debugger") {
        return None;
    }
    let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
    Some(Transformed {
        inserted_line: format!("{indent}// {}", line.trim_start()),
        requires_async: false,
        reason: "debugger statement removed",
    })
}

fn except_exception(line: &str) -> Option<Transformed> {
    let bare = re(r"^(\s*)except\s*:");
    if !bare.is_match(line) {
        return None;
    }
    Some(Transformed {
        inserted_line: bare.replace(line, "${1}except Exception:").into_owned(),
        requires_async: false,
        reason: "never swallow SystemExit or KeyboardInterrupt",
    })
}

fn add_to_copy(line: &str) -> Option<Transformed> {
    let add = re(r"(?i)^(\s*)ADD\s+");
    if !add.is_match(line) || line.contains("http://") || line.contains("https://") {
        return None;
    }
    Some(Transformed {
        inserted_line: add.replace(line, "${1}COPY ").into_owned(),
        requires_async: false,
        reason: "COPY has no archive extraction surprises",
    })
}

fn verify_tls(line: &str) -> Option<Transformed> {
    if !line.contains("InsecureSkipVerify: true") {
        return None;
    }
    Some(Transformed {
        inserted_line: line.replace("InsecureSkipVerify: true", "InsecureSkipVerify: false"),
        requires_async: false,
        reason: "re-enable certificate verification",
    })
}

const TRANSFORMERS: &[Transformer] = &[
    Transformer {
        rule: "http-not-https",
        apply: http_to_https,
    },
    Transformer {
        rule: "missing-await-async-call",
        apply: add_await,
    },
    Transformer {
        rule: "var-keyword",
        apply: var_to_let,
    },
    Transformer {
        rule: "loose-equality",
        apply: strict_equality,
    },
    Transformer {
        rule: "console-log",
        apply: drop_console_log,
    },
    Transformer {
        rule: "yaml-unsafe-load",
        apply: yaml_safe_load,
    },
    Transformer {
        rule: "subprocess-shell-true",
        apply: shell_false,
    },
    Transformer {
        rule: "debugger-statement",
        apply: drop_debugger,
    },
    Transformer {
        rule: "bare-except",
        apply: except_exception,
    },
    Transformer {
        rule: "add-instead-of-copy",
        apply: add_to_copy,
    },
    Transformer {
        rule: "insecure-skip-verify",
        apply: verify_tls,
    },
];

/// Look up the deterministic transformer for a rule, if one exists.
pub fn for_rule(rule: &str) -> Option<&'static Transformer> {
    TRANSFORMERS.iter().find(|t| t.rule == rule)
}

/// Walk upward from `line_idx` and mark the enclosing function declaration
/// async. Supports JS function declarations/expressions and arrow functions;
/// a no-op when the declaration is already async or none is found.
pub fn make_enclosing_async(lines: &mut [String], line_idx: usize) -> bool {
    let decl = re(r"(function\s|\w+\s*=\s*\(|\w+\s*\([^)]*\)\s*(=>|\{)|\([^)]*\)\s*=>)");
    for idx in (0..=line_idx.min(lines.len().saturating_sub(1))).rev() {
        let line = &lines[idx];
        if !decl.is_match(line) {
            continue;
        }
        if line.contains("async ") {
            return false;
        }
        let trimmed = line.trim_start();
        let indent_len = line.len() - trimmed.len();
        let mut updated = line[..indent_len].to_string();
        updated.push_str("async ");
        updated.push_str(trimmed);
        lines[idx] = updated;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_rewrite() {
        let t = for_rule("http-not-https").unwrap();
        let out = t.apply("axios.get('http://api.example.com')").unwrap();
        assert_eq!(out.inserted_line, "axios.get('https://api.example.com')");
        assert!(!out.requires_async);
    }

    #[test]
    fn await_insertion_requests_async_context() {
        let t = for_rule("missing-await-async-call").unwrap();
        let out = t.apply("const x = fetch(url)").unwrap();
        assert_eq!(out.inserted_line, "const x = await fetch(url)");
        assert!(out.requires_async);

        assert!(t.apply("const x = await fetch(url)").is_none());
    }

    #[test]
    fn var_and_equality_rewrites() {
        assert_eq!(
            for_rule("var-keyword").unwrap().apply("  var a = 1").unwrap().inserted_line,
            "  let a = 1"
        );
        assert_eq!(
            for_rule("loose-equality").unwrap().apply("if (a == b && c != d) {").unwrap().inserted_line,
            "if (a === b && c !== d) {"
        );
    }

    #[test]
    fn console_log_commented_out() {
        let out = for_rule("console-log").unwrap().apply("  console.log(x)").unwrap();
        assert_eq!(out.inserted_line, "  // console.log(x)");
    }

    #[test]
    fn python_rewrites() {
        assert_eq!(
            for_rule("yaml-unsafe-load").unwrap().apply("d = yaml.load(f)").unwrap().inserted_line,
            "d = yaml.safe_load(f)"
        );
        assert_eq!(
            for_rule("subprocess-shell-true").unwrap().apply("run(cmd, shell=True)").unwrap().inserted_line,
            "run(cmd, shell=False)"
        );
    }

    #[test]
    fn unknown_rule_has_no_transformer() {
        assert!(for_rule("missing-healthcheck").is_none());
    }

    #[test]
    fn bare_except_narrowed() {
        assert_eq!(
            for_rule("bare-except").unwrap().apply("    except:").unwrap().inserted_line,
            "    except Exception:"
        );
    }

    #[test]
    fn dockerfile_add_becomes_copy_unless_remote() {
        let t = for_rule("add-instead-of-copy").unwrap();
        assert_eq!(t.apply("ADD src /app/src").unwrap().inserted_line, "COPY src /app/src");
        assert!(t.apply("ADD https://example.com/x.tar.gz /tmp").is_none());
    }

    #[test]
    fn tls_verification_restored() {
        let t = for_rule("insecure-skip-verify").unwrap();
        assert_eq!(
            t.apply("cfg := &tls.Config{InsecureSkipVerify: true}").unwrap().inserted_line,
            "cfg := &tls.Config{InsecureSkipVerify: false}"
        );
    }

    #[test]
    fn marks_enclosing_function_async() {
        let mut lines: Vec<String> = vec![
            "function load(url) {".into(),
            "  const x = await fetch(url)".into(),
            "}".into(),
        ];
        assert!(make_enclosing_async(&mut lines, 1));
        assert_eq!(lines[0], "async function load(url) {");

        // Already async: no edit.
        assert!(!make_enclosing_async(&mut lines, 1));
    }
}
