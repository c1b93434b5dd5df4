//! Post-processing: deterministic cleanup of model-generated page text.
//!
//! Vision models occasionally wrap their answer in code fences, emit `\r\n`,
//! pad lines, or insert image references for figures they saw. Cloud OCR
//! returns Markdown with `![img-0.jpeg](img-0.jpeg)` links for every figure.
//! None of that belongs in a text or EPUB export.
//!
//! ## Rule Order
//!
//! Normalise line endings before trimming, strip fences before anything looks
//! at line content, and remove image links before blank lines are collapsed so
//! the holes they leave are collapsed too.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean raw text returned by a vision model for one page.
///
/// Rules (applied in order):
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Remove image references
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive blank lines down to 2
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Trim the whole page
pub fn clean_page_text(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = strip_image_refs(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

/// Clean one page of cloud OCR Markdown.
///
/// A page whose content is a single stray character after cleanup is treated
/// as empty: the service emits such debris for blank pages.
pub fn clean_ocr_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_image_refs(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = s.trim();
    if s.chars().count() <= 1 {
        String::new()
    } else {
        s.to_string()
    }
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|text|plaintext)?\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove image references ──────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());

/// Remove every Markdown image reference `![alt](target)`.
pub fn strip_image_refs(input: &str) -> String {
    RE_IMAGE.replace_all(input, "").into_owned()
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 6: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
