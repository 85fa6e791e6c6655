//! Minimal syntactic tweaks: the conservative, non-semantic backstop
//! applied when no advisor proposal is available or accepted.
//!
//! These rules never touch program semantics; they only re-balance
//! delimiters and punctuation. The first rule that changes the code
//! wins.

/// Apply the first applicable tweak rule. Returns `None` when nothing
/// changed.
pub fn apply_minimal_tweak(code: &str, parser_hint: Option<&str>) -> Option<String> {
    if let Some(fixed) = insert_missing_object_comma(code) {
        return Some(fixed);
    }
    if let Some(fixed) = close_unclosed_call(code) {
        return Some(fixed);
    }
    if let Some(fixed) = add_missing_semicolon(code) {
        return Some(fixed);
    }
    if let Some(fixed) = double_quote_log_arguments(code) {
        return Some(fixed);
    }
    if let Some(hint) = parser_hint {
        if hint_mentions_brackets(hint) {
            if let Some(fixed) = balance_brackets(code) {
                return Some(fixed);
            }
        }
    }
    None
}

/// `key: value` line followed by another `key:` line inside an object
/// literal, with no separating comma.
fn insert_missing_object_comma(code: &str) -> Option<String> {
    let lines: Vec<&str> = code.lines().collect();
    for i in 0..lines.len().saturating_sub(1) {
        let current = lines[i].trim_end();
        let next = lines[i + 1].trim_start();
        if is_object_entry(current.trim_start())
            && !current.ends_with(',')
            && !current.ends_with('{')
            && !current.ends_with('[')
            && is_object_key_start(next)
        {
            let mut fixed: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            fixed[i] = format!("{current},");
            return Some(rejoin(fixed, code));
        }
    }
    None
}

/// A call with more `(` than `)` on a single line gets the missing
/// closers appended.
fn close_unclosed_call(code: &str) -> Option<String> {
    let lines: Vec<&str> = code.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let (opens, closes) = paren_counts(line);
        if opens > closes && looks_like_call(line) {
            let missing = ")".repeat(opens - closes);
            let mut fixed: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            let trimmed = line.trim_end();
            fixed[i] = match trimmed.strip_suffix(';') {
                Some(body) => format!("{body}{missing};"),
                None => format!("{trimmed}{missing}"),
            };
            return Some(rejoin(fixed, code));
        }
    }
    None
}

/// Simple `let`/`const`/`return` statements get a trailing semicolon.
fn add_missing_semicolon(code: &str) -> Option<String> {
    let lines: Vec<&str> = code.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        let starts = trimmed.starts_with("let ")
            || trimmed.starts_with("const ")
            || trimmed == "return"
            || trimmed.starts_with("return ");
        let (opens, closes) = paren_counts(line);
        let balanced = opens == closes;
        if starts
            && balanced
            && !trimmed.is_empty()
            && !trimmed.ends_with(';')
            && !trimmed.ends_with('{')
            && !trimmed.ends_with(',')
            && !trimmed.ends_with("=>")
        {
            let mut fixed: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            fixed[i] = format!("{};", line.trim_end());
            return Some(rejoin(fixed, code));
        }
    }
    None
}

/// Stray single-quoted arguments in log calls become double-quoted.
fn double_quote_log_arguments(code: &str) -> Option<String> {
    let lines: Vec<&str> = code.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if line.contains("log(") && line.contains('\'') {
            let mut fixed: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            fixed[i] = line.replace('\'', "\"");
            return Some(rejoin(fixed, code));
        }
    }
    None
}

/// Append closers for every unmatched `(`, `{`, `[` at EOF, innermost
/// first.
fn balance_brackets(code: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string: Option<char> = None;
    for c in code.chars() {
        match in_string {
            Some(quote) => {
                if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => in_string = Some(c),
                '(' | '{' | '[' => stack.push(c),
                ')' | '}' | ']' => {
                    let expected = match c {
                        ')' => '(',
                        '}' => '{',
                        _ => '[',
                    };
                    if stack.last() == Some(&expected) {
                        stack.pop();
                    }
                }
                _ => {}
            },
        }
    }
    if stack.is_empty() {
        return None;
    }
    let closers: String = stack
        .iter()
        .rev()
        .map(|open| match open {
            '(' => ')',
            '{' => '}',
            _ => ']',
        })
        .collect();
    Some(format!("{code}{closers}"))
}

/// Parenthesis counts outside string literals.
fn paren_counts(line: &str) -> (usize, usize) {
    let mut opens = 0;
    let mut closes = 0;
    let mut in_string: Option<char> = None;
    for c in line.chars() {
        match in_string {
            Some(quote) => {
                if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => in_string = Some(c),
                '(' => opens += 1,
                ')' => closes += 1,
                _ => {}
            },
        }
    }
    (opens, closes)
}

fn hint_mentions_brackets(hint: &str) -> bool {
    let lower = hint.to_lowercase();
    lower.contains("bracket")
        || lower.contains("paren")
        || lower.contains("brace")
        || lower.contains("unexpected end")
        || ['(', ')', '{', '}', '[', ']']
            .iter()
            .any(|c| lower.contains(*c))
}

fn is_object_entry(line: &str) -> bool {
    match line.find(':') {
        Some(pos) if pos > 0 => {
            let key = line[..pos].trim().trim_matches(|c| c == '"' || c == '\'');
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
                && !line[pos + 1..].trim().is_empty()
        }
        _ => false,
    }
}

fn is_object_key_start(line: &str) -> bool {
    match line.find(':') {
        Some(pos) if pos > 0 => {
            let key = line[..pos].trim().trim_matches(|c| c == '"' || c == '\'');
            !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

fn looks_like_call(line: &str) -> bool {
    let bytes = line.as_bytes();
    line.char_indices().any(|(i, c)| {
        c == '('
            && i > 0
            && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_' || bytes[i - 1] == b'$')
    })
}

fn rejoin(lines: Vec<String>, original: &str) -> String {
    let mut joined = lines.join("\n");
    if original.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_object_comma() {
        let code = "const opts = {\n  retries: 3\n  verbose: true\n};";
        let fixed = apply_minimal_tweak(code, None).unwrap();
        assert!(fixed.contains("retries: 3,"));
        assert!(fixed.contains("verbose: true"));
    }

    #[test]
    fn test_close_unclosed_call() {
        let code = "console.log(\"x\"";
        let fixed = apply_minimal_tweak(code, None).unwrap();
        assert_eq!(fixed, "console.log(\"x\")");
    }

    #[test]
    fn test_close_unclosed_call_keeps_semicolon_last() {
        let code = "doWork(a, (b;";
        let fixed = apply_minimal_tweak(code, None).unwrap();
        assert_eq!(fixed, "doWork(a, (b));");
    }

    #[test]
    fn test_missing_semicolon_on_let() {
        let code = "let total = a + b";
        let fixed = apply_minimal_tweak(code, None).unwrap();
        assert_eq!(fixed, "let total = a + b;");
    }

    #[test]
    fn test_missing_semicolon_on_return() {
        let code = "return result";
        let fixed = apply_minimal_tweak(code, None).unwrap();
        assert_eq!(fixed, "return result;");
    }

    #[test]
    fn test_single_quoted_log_arguments() {
        let code = "logger.log('started');";
        let fixed = apply_minimal_tweak(code, None).unwrap();
        assert_eq!(fixed, "logger.log(\"started\");");
    }

    #[test]
    fn test_balance_only_with_hint() {
        let code = "function f() {\n  if (x) {\n    g();";
        assert!(apply_minimal_tweak(code, None).is_none());
        let fixed = apply_minimal_tweak(code, Some("unexpected end of input")).unwrap();
        assert!(fixed.ends_with("}}"));
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        // The parens live inside a string literal, so only the missing
        // semicolon is fixed.
        let code = "let s = \"((\"";
        let fixed = apply_minimal_tweak(code, Some("missing bracket"));
        assert_eq!(fixed.unwrap(), "let s = \"((\";");
    }

    #[test]
    fn test_clean_code_untouched() {
        let code = "const x = 1;\nconsole.log(\"ok\");\n";
        assert!(apply_minimal_tweak(code, None).is_none());
    }

    #[test]
    fn test_preserves_trailing_newline() {
        let code = "let a = 1\n";
        let fixed = apply_minimal_tweak(code, None).unwrap();
        assert_eq!(fixed, "let a = 1;\n");
    }
}
