//! Best-effort JSON repair for malformed model output.
//!
//! Models garble tool-call JSON in a handful of recurring ways: stuttered or
//! trailing commas, single quotes, bare keys, Python literals and truncation.
//! This module normalizes those without pulling in a lenient parser.
//!
//! Passes, in order (each is a no-op when it finds nothing to fix):
//! 1. Strip control characters; escape raw line breaks and tabs inside strings.
//! 2. Collapse repeated commas (`,,` / `, ,`) into one.
//! 3. Remove commas directly before `}` or `]`.
//! 4. Convert single quotes to double quotes, unless the text already has a
//!    double-quoted key (mixed quoting is left alone).
//! 5. Quote bare object keys.
//! 6. Rewrite `True` / `False` / `None` outside strings.
//! 7. Close a truncated tool-call object, bounded by a maximum depth, and only
//!    when the text carries a `"tool"` key.
//!
//! The result must be a JSON object; anything else counts as a failed repair.

use {serde_json::Value, tracing::debug};

use crate::config::DEFAULT_MAX_AUTOCLOSE_DEPTH;

/// Parse `input` as a JSON object, repairing it when the strict parse fails.
///
/// Returns `None` if the input cannot be salvaged into an object.
pub fn repair_json(input: &str) -> Option<Value> {
    repair_json_with_depth(input, DEFAULT_MAX_AUTOCLOSE_DEPTH)
}

/// Like [`repair_json`] with an explicit bound on synthesized closers.
pub fn repair_json_with_depth(input: &str, max_autoclose_depth: usize) -> Option<Value> {
    // Fast path: try exact parse first.
    if let Ok(v) = serde_json::from_str::<Value>(input) {
        return v.is_object().then_some(v);
    }

    let normalized = normalize(input);
    if let Some(v) = parse_object(&normalized) {
        debug!(len = input.len(), "repaired malformed JSON");
        return Some(v);
    }

    let closed = auto_close(&normalized, max_autoclose_depth)?;
    let v = parse_object(&closed)?;
    debug!(len = input.len(), "repaired truncated tool-call JSON");
    Some(v)
}

/// Apply passes 1–6.
fn normalize(input: &str) -> String {
    let mut text = strip_control_chars(input);
    text = collapse_repeated_commas(&text);
    text = remove_trailing_commas(&text);
    if text.contains('\'') && !has_double_quoted_key(&text) {
        text = text.replace('\'', "\"");
    }
    text = quote_bare_keys(&text);
    replace_python_literals(&text)
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

/// Tracks whether a forward character walk is inside a double-quoted string.
#[derive(Default)]
struct StringTracker {
    in_string: bool,
    escape_next: bool,
}

impl StringTracker {
    /// Feed one character; returns `true` when it belongs to a string literal
    /// (including its delimiting quotes).
    fn step(&mut self, ch: char) -> bool {
        if self.in_string {
            if self.escape_next {
                self.escape_next = false;
            } else if ch == '\\' {
                self.escape_next = true;
            } else if ch == '"' {
                self.in_string = false;
            }
            return true;
        }
        if ch == '"' {
            self.in_string = true;
            return true;
        }
        false
    }
}

// ── Pass 1: control characters ──────────────────────────────────────────────

fn strip_control_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut strings = StringTracker::default();
    for ch in input.chars() {
        let was_in_string = strings.in_string;
        match ch {
            '\n' | '\r' | '\t' if was_in_string && !strings.escape_next => {
                out.push_str(match ch {
                    '\n' => "\\n",
                    '\r' => "\\r",
                    _ => "\\t",
                });
            },
            '\n' | '\r' | '\t' => {
                strings.step(ch);
                out.push(ch);
            },
            c if c.is_control() => {},
            c => {
                strings.step(c);
                out.push(c);
            },
        }
    }
    out
}

// ── Pass 2 & 3: commas ──────────────────────────────────────────────────────

fn collapse_repeated_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut strings = StringTracker::default();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if strings.step(ch) || ch != ',' {
            out.push(ch);
            i += 1;
            continue;
        }
        out.push(',');
        i += 1;
        // Swallow any further commas separated only by whitespace.
        loop {
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && chars[j] == ',' {
                i = j + 1;
            } else {
                break;
            }
        }
    }
    out
}

fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut strings = StringTracker::default();
    for (i, &ch) in chars.iter().enumerate() {
        if !strings.step(ch) && ch == ',' {
            // Look ahead past whitespace for } or ].
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

// ── Pass 4: quote style ─────────────────────────────────────────────────────

/// Does the text contain a `"...":` key?
fn has_double_quoted_key(input: &str) -> bool {
    let mut strings = StringTracker::default();
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        let was_in_string = strings.in_string;
        strings.step(ch);
        if was_in_string && !strings.in_string {
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&':') {
                return true;
            }
        }
    }
    false
}

// ── Pass 5 & 6: bare words ──────────────────────────────────────────────────

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '-'
}

fn quote_bare_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut strings = StringTracker::default();
    let mut last_significant: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if strings.step(ch) {
            out.push(ch);
            last_significant = Some(ch);
            i += 1;
            continue;
        }
        if is_ident_start(ch) && matches!(last_significant, Some('{') | Some(',')) {
            let end = chars[i..]
                .iter()
                .position(|&c| !is_ident_char(c))
                .map_or(chars.len(), |p| i + p);
            let after = chars[end..].iter().find(|c| !c.is_whitespace());
            let word: String = chars[i..end].iter().collect();
            if after == Some(&':') {
                out.push('"');
                out.push_str(&word);
                out.push('"');
            } else {
                out.push_str(&word);
            }
            last_significant = Some(chars[end - 1]);
            i = end;
            continue;
        }
        if !ch.is_whitespace() {
            last_significant = Some(ch);
        }
        out.push(ch);
        i += 1;
    }
    out
}

fn replace_python_literals(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut strings = StringTracker::default();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if strings.step(ch) || !is_ident_start(ch) {
            out.push(ch);
            i += 1;
            continue;
        }
        let end = chars[i..]
            .iter()
            .position(|&c| !is_ident_char(c))
            .map_or(chars.len(), |p| i + p);
        let word: String = chars[i..end].iter().collect();
        out.push_str(match word.as_str() {
            "True" => "true",
            "False" => "false",
            "None" => "null",
            other => other,
        });
        i = end;
    }
    out
}

// ── Pass 7: truncation ──────────────────────────────────────────────────────

/// Position of the `{` that opens the last object carrying a `"tool"` key.
fn last_tool_object_start(text: &str) -> Option<usize> {
    let mut search_end = text.len();
    while let Some(hit) = text[..search_end].rfind("\"tool\"") {
        let after = text[hit + "\"tool\"".len()..].trim_start();
        if after.starts_with(':') {
            return text[..hit].rfind('{');
        }
        search_end = hit;
    }
    None
}

/// Count of `{` left open at the end of `text`, ignoring braces in strings.
pub(crate) fn open_brace_depth(text: &str) -> usize {
    let mut strings = StringTracker::default();
    let mut depth = 0usize;
    for ch in text.chars() {
        if strings.step(ch) {
            continue;
        }
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {},
        }
    }
    depth
}

/// Append the closers a truncated tool-call fragment is missing.
///
/// Returns `None` when the text has no `"tool"` key, is not actually
/// truncated, or would need more than `max_depth` closers.
fn auto_close(text: &str, max_depth: usize) -> Option<String> {
    let anchor = last_tool_object_start(text)?;

    let mut stack: Vec<char> = Vec::new();
    let mut strings = StringTracker::default();
    for ch in text[anchor..].chars() {
        if strings.step(ch) {
            continue;
        }
        match ch {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            },
            _ => {},
        }
    }

    if stack.is_empty() {
        return None;
    }
    if stack.len() > max_depth {
        debug!(
            depth = stack.len(),
            max_depth, "truncated tool call too deep to auto-close"
        );
        return None;
    }

    let mut closed = text.trim_end().to_string();
    if strings.in_string {
        if strings.escape_next {
            closed.pop();
        }
        closed.push('"');
    }
    while let Some(closer) = stack.pop() {
        closed.push(closer);
    }
    Some(remove_trailing_commas(&closed))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[test]
    fn valid_json_passes_through() {
        let input = r#"{"tool": "sandbox_exec", "args": {"command": "ls"}}"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["tool"], "sandbox_exec");
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(repair_json("[1, 2, 3]").is_none());
        assert!(repair_json("42").is_none());
        assert!(repair_json("\"tool\"").is_none());
    }

    #[test]
    fn trailing_commas() {
        let input = r#"{"tool": "sandbox_exec", "args": {"command": "ls",},}"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["tool"], "sandbox_exec");
        assert_eq!(v["args"], json!({"command": "ls"}));
    }

    #[test]
    fn trailing_comma_array() {
        let v = repair_json(r#"{"items": [1, 2, 3,]}"#).unwrap();
        assert_eq!(v["items"].as_array().unwrap().len(), 3);
    }

    #[rstest]
    #[case(r#"{"tool": "sandbox_exec",, "args": {"command": "ls"}}"#)]
    #[case(r#"{"tool": "sandbox_exec", , "args": {"command": "ls"}}"#)]
    #[case(r#"{"tool": "sandbox_exec",,,, "args": {"command": "ls"}}"#)]
    fn stuttered_commas_collapse(#[case] input: &str) {
        let v = repair_json(input).unwrap();
        assert_eq!(v["tool"], "sandbox_exec");
        assert_eq!(v["args"]["command"], "ls");
    }

    #[test]
    fn unquoted_keys() {
        let input = r#"{tool: "sandbox_exec", args: {"command": "ls"}}"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["tool"], "sandbox_exec");
        assert_eq!(v["args"]["command"], "ls");
    }

    #[test]
    fn single_quotes_converted() {
        let input = "{'tool': 'web_search', 'args': {'query': 'rust'}}";
        let v = repair_json(input).unwrap();
        assert_eq!(v["tool"], "web_search");
        assert_eq!(v["args"]["query"], "rust");
    }

    #[test]
    fn mixed_quotes_left_alone() {
        // An apostrophe in a value must not be rewritten when keys are
        // already double-quoted.
        let input = r#"{"tool": "ask_user", "args": {"question": "Isn't it?", "options": [],},}"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["args"]["question"], "Isn't it?");
    }

    #[test]
    fn python_literals_outside_strings() {
        let input = r#"{"flag": True, "other": False, "missing": None, "text": "True story",}"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["flag"], json!(true));
        assert_eq!(v["other"], json!(false));
        assert_eq!(v["missing"], Value::Null);
        assert_eq!(v["text"], "True story");
    }

    #[test]
    fn python_dict_style() {
        let input = "{'tool': 'sandbox_exec', 'args': {'command': 'ls', 'background': False}}";
        let v = repair_json(input).unwrap();
        assert_eq!(v["args"]["background"], json!(false));
    }

    #[test]
    fn control_characters_stripped() {
        let input = "{\"tool\": \"sandbox_exec\",\u{0000} \"args\": {\"command\": \"ls\u{0007}\"}}";
        let v = repair_json(input).unwrap();
        assert_eq!(v["args"]["command"], "ls");
    }

    #[test]
    fn raw_newlines_inside_strings_escaped() {
        let input = "{\"tool\": \"sandbox_write_file\", \"args\": {\"path\": \"a.txt\", \"content\": \"one\ntwo\"}}";
        let v = repair_json(input).unwrap();
        assert_eq!(v["args"]["content"], "one\ntwo");
    }

    #[test]
    fn comma_inside_string_preserved() {
        let v = repair_json(r#"{"msg": "hello,, world", "n": 1,}"#).unwrap();
        assert_eq!(v["msg"].as_str().unwrap(), "hello,, world");
    }

    #[test]
    fn missing_single_brace_auto_closed() {
        let input = r#"{"tool": "sandbox_exec", "args": {"command": "ls"}"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["tool"], "sandbox_exec");
        assert_eq!(v["args"]["command"], "ls");
    }

    #[test]
    fn open_string_closed_first() {
        let input = r#"{"tool": "web_search", "args": {"query": "rust borrow"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["args"]["query"], "rust borrow");
    }

    #[test]
    fn dangling_comma_before_synthesized_closer() {
        let input = r#"{"tool": "web_search", "args": {"query": "rust"},"#;
        let v = repair_json(input).unwrap();
        assert_eq!(v["tool"], "web_search");
    }

    #[test]
    fn no_tool_key_never_auto_closed() {
        assert!(repair_json(r#"{"name": "foo", "value": 42"#).is_none());
    }

    #[rstest]
    #[case(1, true)]
    #[case(2, true)]
    #[case(3, true)]
    #[case(4, false)]
    #[case(5, false)]
    fn auto_close_depth_bound(#[case] depth: usize, #[case] recovered: bool) {
        // One open brace for the call itself, the rest nested inside args.
        let mut input = String::from(r#"{"tool": "sandbox_exec", "args": "#);
        for level in 1..depth {
            input.push_str(&format!(r#"{{"k{level}": "#));
        }
        input.push_str("1");
        assert_eq!(repair_json(&input).is_some(), recovered, "{input}");
    }

    #[test]
    fn depth_bound_is_tunable() {
        let input = r#"{"tool": "x", "args": {"a": {"b": {"c": 1"#;
        assert!(repair_json(input).is_none());
        assert!(repair_json_with_depth(input, 4).is_some());
    }

    #[test]
    fn auto_close_uses_last_tool_occurrence() {
        let input = r#"{"tool": "a", "args": {}} then {"tool": "b", "args": {"q": 1"#;
        // The prefix is complete, the text as a whole is not one object.
        assert!(repair_json(input).is_none());
        let tail = &input[input.rfind("{\"tool\"").unwrap()..];
        assert_eq!(repair_json(tail).unwrap()["tool"], "b");
    }

    #[rstest]
    #[case(r#"{"a": 1}"#, 0)]
    #[case(r#"{"a": {"b": "}}"#, 2)]
    #[case(r#"{"a": "\"{"#, 1)]
    #[case("}}{", 1)]
    fn open_depth_ignores_string_braces(#[case] input: &str, #[case] depth: usize) {
        assert_eq!(open_brace_depth(input), depth);
    }

    #[test]
    fn irreparable_returns_none() {
        assert!(repair_json("not json at all").is_none());
        assert!(repair_json("").is_none());
        assert!(repair_json("{\"tool\": ").is_none());
    }

    #[rstest]
    #[case(r#"{"tool": "sandbox_exec", "args": {"command": "ls",},}"#)]
    #[case(r#"{tool: 'sandbox_exec', args: {command: 'ls'}}"#)]
    #[case(r#"{"tool": "sandbox_exec", "args": {"command": "ls"}"#)]
    #[case("{'ok': True, 'n': None,}")]
    fn repair_is_idempotent(#[case] input: &str) {
        let once = repair_json(input).unwrap();
        let twice = repair_json(&once.to_string()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn never_panics_on_prefixes() {
        let full = r#"{"tool": "ask_user", "args": {"question": "Pick \"one\"", "options": ["a", "b"]}}"#;
        for end in 0..=full.len() {
            let _ = repair_json(&full[..end]);
        }
    }
}
