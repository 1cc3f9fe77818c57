//! Locate candidate JSON spans in free-form model output.
//!
//! Two passes produce candidates in the order detection tries them:
//!
//! 1. **Fenced blocks** opened by three or more backticks or tildes, with an
//!    optional `json`, `jsonc` or `tool_call` tag, closed at the start of a
//!    line by a run of the same character at least as long as the opener.
//! 2. **Bare objects** anywhere in the text (fences included), found by brace
//!    counting that skips over double-quoted strings.
//!
//! The bare pass runs over the whole text so prose inside a fence
//! (`Here is the call:\n{...}`) still yields the embedded object.

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Fenced,
    Bare,
}

/// A span of the input that may hold a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub text: &'a str,
    pub provenance: Provenance,
    /// Byte offset of `text` in the scanned input.
    pub start: usize,
    /// Byte offset one past the end of `text`.
    pub end: usize,
}

/// Fence tags whose content is worth parsing. Other tags (`python`, `bash`)
/// are paired and skipped.
const JSON_FENCE_TAGS: &[&str] = &["", "json", "jsonc", "tool_call"];

const MIN_FENCE_RUN: usize = 3;

/// Produce every candidate in `text`: fenced blocks first, then bare objects.
pub fn scan(text: &str) -> Vec<Candidate<'_>> {
    let mut candidates = fenced_candidates(text);
    candidates.extend(bare_candidates(text));
    candidates
}

// ── Fenced blocks ───────────────────────────────────────────────────────────

enum FenceState {
    Scanning,
    InFence {
        fence: u8,
        run: usize,
        body_start: usize,
        yields: bool,
    },
}

/// Collect the trimmed inner content of every fenced block, in document order.
pub fn fenced_candidates(text: &str) -> Vec<Candidate<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut state = FenceState::Scanning;
    let mut i = 0;
    // Only whitespace seen since the last line break.
    let mut line_blank = true;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'`' && b != b'~' {
            match b {
                b'\n' => line_blank = true,
                b' ' | b'\t' => {},
                _ => line_blank = false,
            }
            i += 1;
            continue;
        }
        let run = run_length(bytes, i, b);
        let starts_line = line_blank;
        line_blank = false;

        match state {
            FenceState::Scanning => {
                if run < MIN_FENCE_RUN {
                    i += run;
                    continue;
                }
                let info_start = i + run;
                let Some(newline_rel) = text[info_start..].find('\n') else {
                    // Opener without a line break yet: nothing more to pair.
                    break;
                };
                let info = text[info_start..info_start + newline_rel].trim();
                if info.as_bytes().contains(&b) {
                    i += run;
                    continue;
                }
                let tag = info
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                state = FenceState::InFence {
                    fence: b,
                    run,
                    body_start: info_start + newline_rel + 1,
                    yields: JSON_FENCE_TAGS.contains(&tag.as_str()),
                };
                i = info_start + newline_rel + 1;
                line_blank = true;
            },
            FenceState::InFence {
                fence,
                run: open_run,
                body_start,
                yields,
            } => {
                if b != fence || run < open_run || !starts_line {
                    i += run;
                    continue;
                }
                if yields && let Some(candidate) = trimmed_span(text, body_start, i) {
                    out.push(candidate);
                }
                state = FenceState::Scanning;
                i += run;
            },
        }
    }

    out
}

fn run_length(bytes: &[u8], from: usize, b: u8) -> usize {
    bytes[from..].iter().take_while(|&&c| c == b).count()
}

fn trimmed_span(text: &str, start: usize, end: usize) -> Option<Candidate<'_>> {
    let body = &text[start..end];
    let trimmed_start = body.trim_start();
    let lead = body.len() - trimmed_start.len();
    let trimmed = trimmed_start.trim_end();
    if trimmed.is_empty() {
        return None;
    }
    let start = start + lead;
    Some(Candidate {
        text: trimmed,
        provenance: Provenance::Fenced,
        start,
        end: start + trimmed.len(),
    })
}

// ── Bare objects ────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum StringState {
    Structure,
    InString,
    Escaped,
}

/// An open brace and the objects that closed directly inside it.
struct Frame {
    open: usize,
    children: Vec<(usize, usize)>,
}

/// Collect every balanced object not nested inside another balanced object,
/// in one forward pass over the whole text.
///
/// A brace that never closes yields nothing, so a truncated call at the end
/// of a stream is left to diagnosis. Objects that closed inside it are still
/// candidates. Braces inside strings of an unclosed object are not revisited.
pub fn bare_candidates(text: &str) -> Vec<Candidate<'_>> {
    let mut spans = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut state = StringState::Structure;

    for (i, &b) in text.as_bytes().iter().enumerate() {
        if stack.is_empty() {
            // Prose between objects: quotes there are not JSON strings.
            if b == b'{' {
                stack.push(Frame {
                    open: i,
                    children: Vec::new(),
                });
            }
            continue;
        }
        state = match state {
            StringState::Escaped => StringState::InString,
            StringState::InString => match b {
                b'\\' => StringState::Escaped,
                b'"' => StringState::Structure,
                _ => StringState::InString,
            },
            StringState::Structure => match b {
                b'"' => StringState::InString,
                b'{' => {
                    stack.push(Frame {
                        open: i,
                        children: Vec::new(),
                    });
                    StringState::Structure
                },
                b'}' => {
                    if let Some(frame) = stack.pop() {
                        let span = (frame.open, i);
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(span),
                            None => spans.push(span),
                        }
                    }
                    StringState::Structure
                },
                _ => StringState::Structure,
            },
        };
    }

    // Unclosed frames, outermost first, keep document order.
    for frame in stack {
        spans.extend(frame.children);
    }

    spans
        .into_iter()
        .map(|(start, end)| Candidate {
            text: &text[start..=end],
            provenance: Provenance::Bare,
            start,
            end: end + 1,
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn texts<'a>(candidates: &[Candidate<'a>]) -> Vec<&'a str> {
        candidates.iter().map(|c| c.text).collect()
    }

    #[rstest]
    #[case("```\n{\"a\": 1}\n```")]
    #[case("~~~\n{\"a\": 1}\n~~~")]
    #[case("````\n{\"a\": 1}\n````")]
    #[case("```json\n{\"a\": 1}\n```")]
    #[case("```jsonc\n{\"a\": 1}\n```")]
    #[case("```JSON\n{\"a\": 1}\n```")]
    #[case("```tool_call\n{\"a\": 1}\n```")]
    fn fence_variants_yield_inner_content(#[case] text: &str) {
        let fenced = fenced_candidates(text);
        assert_eq!(texts(&fenced), vec![r#"{"a": 1}"#]);
        assert_eq!(fenced[0].provenance, Provenance::Fenced);
        assert_eq!(&text[fenced[0].start..fenced[0].end], fenced[0].text);
    }

    #[test]
    fn other_language_tags_are_skipped() {
        let text = "```python\nprint({'a': 1})\n```\n```json\n{\"b\": 2}\n```";
        assert_eq!(texts(&fenced_candidates(text)), vec![r#"{"b": 2}"#]);
    }

    #[test]
    fn closing_fence_must_match_character() {
        let text = "```\n{\"a\": 1}\n~~~\nstill inside\n```";
        assert_eq!(
            texts(&fenced_candidates(text)),
            vec!["{\"a\": 1}\n~~~\nstill inside"]
        );
    }

    #[test]
    fn longer_fence_contains_shorter_run() {
        let text = "````\n{\"code\": \"```\"}\n````";
        assert_eq!(texts(&fenced_candidates(text)), vec![r#"{"code": "```"}"#]);
    }

    #[test]
    fn multiple_fences_in_document_order() {
        let text = "first\n```\n{\"n\": 1}\n```\nthen\n~~~json\n{\"n\": 2}\n~~~";
        assert_eq!(
            texts(&fenced_candidates(text)),
            vec![r#"{"n": 1}"#, r#"{"n": 2}"#]
        );
    }

    #[test]
    fn unclosed_fence_yields_nothing() {
        assert!(fenced_candidates("```json\n{\"a\": 1}").is_empty());
        assert!(fenced_candidates("```").is_empty());
    }

    #[test]
    fn empty_fence_yields_nothing() {
        assert!(fenced_candidates("```\n   \n```").is_empty());
    }

    #[test]
    fn inline_backticks_are_not_fences() {
        assert!(fenced_candidates("use `x` or ``y``").is_empty());
    }

    #[test]
    fn bare_objects_in_prose() {
        let text = r#"Sure: {"a": 1} and also {"b": {"c": 2}} done"#;
        assert_eq!(
            texts(&bare_candidates(text)),
            vec![r#"{"a": 1}"#, r#"{"b": {"c": 2}}"#]
        );
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"msg": "close } and open {", "n": 1}"#;
        assert_eq!(texts(&bare_candidates(text)), vec![text]);
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let text = r#"{"msg": "say \"}\" loudly"} tail"#;
        assert_eq!(
            texts(&bare_candidates(text)),
            vec![r#"{"msg": "say \"}\" loudly"}"#]
        );
    }

    #[test]
    fn unterminated_object_is_skipped_but_later_objects_found() {
        let text = r#"{"tool": "sandbox_exec", "args": {"command": "ls"}"#;
        // The outer object never closes; the nested one still does.
        assert_eq!(texts(&bare_candidates(text)), vec![r#"{"command": "ls"}"#]);
    }

    #[test]
    fn stray_open_brace_in_prose() {
        let text = r#"a { stray brace, then {"a": 1} and {"b": 2}"#;
        assert_eq!(
            texts(&bare_candidates(text)),
            vec![r#"{"a": 1}"#, r#"{"b": 2}"#]
        );
    }

    #[test]
    fn many_unclosed_braces_terminate() {
        let text = "{".repeat(10_000);
        assert!(bare_candidates(&text).is_empty());
    }

    #[test]
    fn braces_in_strings_of_unclosed_object_scan_linearly() {
        // Every `{` sits inside a string of the unclosed outer object.
        let text = "{\"".repeat(200_000);
        let started = std::time::Instant::now();
        assert!(bare_candidates(&text).is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn streaming_write_with_json_content_stays_linear() {
        let content = r#"{\"k\": {\"v\": 1}}, "#.repeat(10_000);
        let text = format!(
            r#"{{"tool": "sandbox_write_file", "args": {{"path": "data.json", "content": "[{content}"#
        );
        let started = std::time::Instant::now();
        assert!(bare_candidates(&text).is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn objects_closed_inside_unclosed_ones_keep_document_order() {
        let text = r#"{"a": {"n": 1}, "b": {"c": {"n": 2}, "d": {"n": 3}"#;
        assert_eq!(
            texts(&bare_candidates(text)),
            vec![r#"{"n": 1}"#, r#"{"n": 2}"#, r#"{"n": 3}"#]
        );
    }

    #[test]
    fn fence_run_inside_a_line_does_not_close() {
        let json = r##"{"tool": "sandbox_write_file", "args": {"path": "README.md", "content": "# Demo\n```sh\ncargo run\n```\n"}}"##;
        let text = format!("```json\n{json}\n```");
        assert_eq!(texts(&fenced_candidates(&text)), vec![json]);
    }

    #[test]
    fn indented_closing_fence() {
        let text = "```\n{\"a\": 1}\n   ```\nafter";
        assert_eq!(texts(&fenced_candidates(text)), vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn scan_orders_fenced_before_bare() {
        let text = "{\"bare\": 1}\n```\n{\"fenced\": 2}\n```";
        let all = scan(text);
        assert_eq!(all[0].provenance, Provenance::Fenced);
        assert_eq!(all[0].text, r#"{"fenced": 2}"#);
        assert_eq!(
            texts(&all[1..]),
            vec![r#"{"bare": 1}"#, r#"{"fenced": 2}"#]
        );
    }

    #[test]
    fn multibyte_text_is_sliced_safely() {
        let text = "héllo → {\"émoji\": \"🎉\"} ✓";
        assert_eq!(texts(&bare_candidates(text)), vec![r#"{"émoji": "🎉"}"#]);
    }
}
