//! Input sanitization (pure).
//!
//! What this module provides
//! - `sanitize` to normalize and escape untrusted text before it enters a
//!   model request
//! - `SanitizeOptions` to control markup escaping, newline handling, and the
//!   final length cap
//!
//! Pipeline, in order: newline normalization, control-character stripping,
//! blank-line collapsing, per-line whitespace collapsing, trimming, markup
//! escaping, grapheme truncation. Every step is total: no input errors, an
//! empty string comes back empty.
//!
//! This module is self-contained and has no side effects.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::DEFAULT_MAX_INPUT_LENGTH;

/// Options controlling [`sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Hard cap on output length, counted in grapheme clusters and applied
    /// after escaping. A cap landing inside an escaped entity clips it; the
    /// count is over raw graphemes, not entity units.
    pub max_length: usize,

    /// Pass markup characters through unescaped.
    pub allow_markup: bool,

    /// Keep newlines as structural separators. When false the output is
    /// flattened to a single line.
    pub allow_newlines: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_INPUT_LENGTH,
            allow_markup: false,
            allow_newlines: true,
        }
    }
}

/// Normalize and escape untrusted text.
///
/// Strips non-printable characters (keeping newline and tab), collapses runs
/// of blank lines to a single blank line and runs of inline whitespace to a
/// single space, trims the result, escapes `& < > " '` unless
/// `allow_markup`, and finally truncates to `max_length` graphemes.
/// Escaping is idempotent: already-escaped entities are left alone, so
/// sanitizing twice yields the same string.
pub fn sanitize(raw: &str, options: &SanitizeOptions) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let normalized = normalize_newlines(raw);
    let stripped = strip_control_chars(&normalized);
    let collapsed = collapse_blank_lines(&stripped);
    let mut text = collapse_inline_whitespace(&collapsed);
    if !options.allow_newlines {
        text = flatten_lines(&text);
    }
    let trimmed = text.trim();
    let escaped = if options.allow_markup {
        trimmed.to_string()
    } else {
        escape_markup(trimmed)
    };
    truncate_graphemes(&escaped, options.max_length)
}

/// Number of grapheme clusters in `text`.
///
/// The unit the sanitizer truncates by and the default token estimator
/// counts by; an emoji family is one grapheme, not eleven code units.
pub fn grapheme_count(text: &str) -> usize {
    text.graphemes(true).count()
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            if c == '\n' || c == '\t' {
                return true;
            }
            !c.is_control() && c != '\u{2028}' && c != '\u{2029}'
        })
        .collect()
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}

fn collapse_inline_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            let mut out = String::with_capacity(line.len());
            let mut in_run = false;
            for c in line.chars() {
                if c == ' ' || c == '\t' {
                    if !in_run {
                        out.push(' ');
                    }
                    in_run = true;
                } else {
                    in_run = false;
                    out.push(c);
                }
            }
            out.trim_end().to_string()
        })
        .collect();
    lines.join("\n")
}

fn flatten_lines(text: &str) -> String {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        match c {
            '&' => {
                if let Some(len) = entity_len(rest) {
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                    continue;
                }
                out.push_str("&amp;");
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Length in bytes of a complete entity at the start of `text` (which begins
/// with `&`), or `None` if what follows is a bare ampersand.
fn entity_len(text: &str) -> Option<usize> {
    let body = &text[1..];
    if let Some(digits) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        let n = digits.chars().take_while(|c| c.is_ascii_hexdigit()).count();
        if (1..=6).contains(&n) && digits[n..].starts_with(';') {
            return Some(1 + 2 + n + 1);
        }
        return None;
    }
    if let Some(digits) = body.strip_prefix('#') {
        let n = digits.chars().take_while(|c| c.is_ascii_digit()).count();
        if (1..=7).contains(&n) && digits[n..].starts_with(';') {
            return Some(1 + 1 + n + 1);
        }
        return None;
    }
    if !body.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let n = body
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .count();
    if (2..=31).contains(&n) && body[n..].starts_with(';') {
        return Some(1 + n + 1);
    }
    None
}

fn truncate_graphemes(text: &str, max_length: usize) -> String {
    if max_length == 0 {
        return String::new();
    }
    match text.grapheme_indices(true).nth(max_length) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
