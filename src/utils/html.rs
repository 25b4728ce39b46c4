//! Reply markup to plain text.
//!
//! Rendered replies arrive as HTML fragments and are converted to markdown
//! with `htmd`, so paragraphs, lists, headings and code blocks stay readable.
//! Angle brackets that survive as literal text are escaped, which keeps the
//! conversion idempotent on its own output.

use crate::errors::Result;
use htmd::options::{CodeBlockStyle, HeadingStyle, LinkStyle, Options};
use htmd::HtmlToMarkdown;
use regex::Regex;
use std::sync::OnceLock;

const SKIPPED: &[&str] = &["script", "style", "head", "button", "svg", "noscript", "template"];

fn blank_lines_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n{3,}").expect("blank line pattern is valid"))
}

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```.*?```|`[^`\n]*`").expect("code pattern is valid"))
}

fn converter() -> HtmlToMarkdown {
    let options = Options {
        heading_style: HeadingStyle::Atx,
        code_block_style: CodeBlockStyle::Fenced,
        link_style: LinkStyle::Inlined,
        ..Default::default()
    };
    HtmlToMarkdown::builder()
        .options(options)
        .skip_tags(SKIPPED.to_vec())
        .build()
}

/// Convert an HTML fragment to text. Input without unescaped markup outside
/// code is only whitespace-normalized.
pub fn html_to_text(input: &str) -> Result<String> {
    if !has_markup(input) {
        return Ok(normalize(input));
    }

    let markdown = converter().convert(input)?;
    Ok(normalize(&outside_code(&markdown, escape_tags)))
}

/// Whether `<` opens something that parses as a tag anywhere outside code.
fn has_markup(text: &str) -> bool {
    let mut found = false;
    outside_code(text, |segment| {
        found |= tag_openings(segment).next().is_some();
        segment.to_string()
    });
    found
}

/// Apply `f` to the parts of `text` that are not code spans or fences.
fn outside_code(text: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for code in code_pattern().find_iter(text) {
        out.push_str(&f(&text[last..code.start()]));
        out.push_str(code.as_str());
        last = code.end();
    }
    out.push_str(&f(&text[last..]));
    out
}

/// Byte offsets of unescaped `<` that start a tag, comment or end tag.
fn tag_openings(text: &str) -> impl Iterator<Item = usize> + '_ {
    let bytes = text.as_bytes();
    (0..bytes.len()).filter(move |&at| {
        bytes[at] == b'<'
            && (at == 0 || bytes[at - 1] != b'\\')
            && bytes
                .get(at + 1)
                .is_some_and(|next| next.is_ascii_alphabetic() || matches!(next, b'/' | b'!'))
    })
}

fn escape_tags(segment: &str) -> String {
    let openings: Vec<usize> = tag_openings(segment).collect();
    let mut out = String::with_capacity(segment.len() + openings.len());
    let mut last = 0;
    for at in openings {
        out.push_str(&segment[last..at]);
        out.push('\\');
        last = at;
    }
    out.push_str(&segment[last..]);
    out
}

fn normalize(text: &str) -> String {
    let trimmed: Vec<&str> = text.lines().map(str::trim_end).collect();
    let joined = trimmed.join("\n");
    blank_lines_pattern()
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(html: &str) -> String {
        html_to_text(html).unwrap()
    }

    #[test]
    fn single_paragraph() {
        assert_eq!(convert("<p>pong</p>"), "pong");
    }

    #[test]
    fn paragraphs_are_separated_by_blank_lines() {
        let text = convert("<p>First line</p>\n<p>Second <strong>bold</strong></p>");
        assert!(text.starts_with("First line\n\nSecond"), "{text}");
        assert!(text.ends_with("**bold**"), "{text}");
    }

    #[test]
    fn headings_use_hashes() {
        let text = convert("<h2>Steps</h2><p>open the door</p>");
        assert!(text.starts_with("## Steps"), "{text}");
        assert!(text.ends_with("open the door"), "{text}");
    }

    #[test]
    fn list_items_stay_on_their_own_lines() {
        let text = convert("<ol><li>open</li><li>close</li></ol>");
        let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
        assert_eq!(lines.len(), 2, "{text}");
        assert!(lines[0].contains("open") && lines[1].contains("close"), "{text}");
    }

    #[test]
    fn code_blocks_are_fenced() {
        let html = "<pre><code class=\"language-rust\">fn main() {\n    run();\n}\n</code></pre>";
        let text = convert(html);
        assert!(text.starts_with("```"), "{text}");
        assert!(text.contains("fn main() {\n    run();\n}"), "{text}");
    }

    #[test]
    fn controls_and_scripts_are_dropped() {
        let text = convert("<div><p>answer</p><button>Copy code</button><script>track()</script></div>");
        assert_eq!(text, "answer");
    }

    #[test]
    fn plain_text_is_only_normalized() {
        assert_eq!(convert("  plain text  \n\n\n\nmore "), "plain text\n\nmore");
    }

    #[test]
    fn conversion_is_idempotent() {
        let html = "<h3>Title</h3><p>Body with <code>x</code></p><ul><li>one</li></ul>";
        let once = convert(html);
        assert_eq!(convert(&once), once);
    }

    #[test]
    fn escaped_markup_in_replies_stays_text() {
        let once = convert("<p>Use &lt;br&gt; to break lines</p>");
        assert!(once.starts_with("Use "), "{once}");
        assert!(once.contains("br") && once.ends_with("to break lines"), "{once}");
        assert!(!has_markup(&once), "{once}");
        assert_eq!(convert(&once), once);
    }

    #[test]
    fn markup_inside_code_is_not_parsed_again() {
        assert!(!has_markup("wrap it in `<div>` first"));
        assert!(has_markup("<p>x</p>"));
        assert!(!has_markup(r"a \<b> c"));
    }

    #[test]
    fn stray_tags_are_escaped_outside_code() {
        assert_eq!(escape_tags("a <b> c"), r"a \<b> c");
        assert_eq!(outside_code("`<b>` <i>", escape_tags), r"`<b>` \<i>");
    }
}
