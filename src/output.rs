//! Page-level data flowing through a conversion and the assembled result.
//!
//! Internally a document is an ordered `Vec<PageResult>`. The flat
//! marker-delimited string is produced once, by [`assemble_text`], at the
//! boundary consumed by the TXT/EPUB writers.

use crate::config::OcrEngine;
use crate::error::PageError;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One rasterised page, produced by the renderer and consumed by an OCR adapter.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed, stable page number.
    pub page_num: usize,
    pub image: DynamicImage,
}

impl PageImage {
    pub fn new(page_num: usize, image: DynamicImage) -> Self {
        Self { page_num, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Recognised text of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Recognised text; empty when the page failed.
    pub text: String,
    /// Why the page is empty, if it failed.
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn ok(page_num: usize, text: impl Into<String>) -> Self {
        Self {
            page_num,
            text: text.into(),
            error: None,
        }
    }

    pub fn failed(page_num: usize, error: PageError) -> Self {
        Self {
            page_num,
            text: String::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Where the text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Read directly from the PDF's embedded text layer.
    TextLayer,
    /// Recognised by the named OCR engine.
    Ocr(OcrEngine),
}

/// Timing and failure counters for a finished job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub failed_pages: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub recognition_duration_ms: u64,
}

/// Result of a successful job.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// Marker-delimited text, ready for the output writers.
    pub text: String,
    /// Per-page results, ascending by page number, one per page.
    pub pages: Vec<PageResult>,
    pub source: ExtractionSource,
    pub stats: ConversionStats,
}

/// The literal marker preceding page `page_num`.
pub fn page_marker(page_num: usize) -> String {
    format!("\n--- Page {page_num} ---\n")
}

/// Serialize ordered pages to the marker-delimited flat string.
pub fn assemble_text(pages: &[PageResult]) -> String {
    let mut out = String::with_capacity(pages.iter().map(|p| p.text.len() + 16).sum());
    for page in pages {
        out.push_str(&page_marker(page.page_num));
        out.push_str(&page.text);
    }
    out
}

/// Put recognised pages into final shape for a document of `page_count` pages.
///
/// Results are sorted by page number; duplicates keep the first occurrence;
/// out-of-range pages are dropped; pages with no result become empty pages
/// carrying [`PageError::Missing`]. The returned vector covers exactly
/// `1..=page_count`.
pub fn normalize_pages(mut results: Vec<PageResult>, page_count: usize) -> Vec<PageResult> {
    results.sort_by_key(|p| p.page_num);
    results.dedup_by_key(|p| p.page_num);

    let mut by_page = results
        .into_iter()
        .filter(|p| p.page_num >= 1 && p.page_num <= page_count)
        .peekable();

    let mut out = Vec::with_capacity(page_count);
    for page_num in 1..=page_count {
        match by_page.next_if(|p| p.page_num == page_num) {
            Some(result) => out.push(result),
            None => out.push(PageResult::failed(page_num, PageError::Missing { page: page_num })),
        }
    }
    out
}

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n--- Page (\d+) ---\n").unwrap());

/// Parse marker-delimited text back into `(page_num, text)` pairs.
///
/// Text before the first marker is ignored.
pub fn split_marked_text(text: &str) -> Vec<(usize, String)> {
    let markers: Vec<(usize, usize, usize)> = RE_PAGE_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let num = caps[1].parse().ok()?;
            Some((num, whole.start(), whole.end()))
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(i, &(num, _, body_start))| {
            let body_end = markers.get(i + 1).map_or(text.len(), |next| next.1);
            (num, text[body_start..body_end].to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_format_is_literal() {
        assert_eq!(page_marker(3), "\n--- Page 3 ---\n");
    }

    #[test]
    fn assemble_prefixes_every_page() {
        let pages = vec![PageResult::ok(1, "alpha"), PageResult::ok(2, "beta")];
        assert_eq!(
            assemble_text(&pages),
            "\n--- Page 1 ---\nalpha\n--- Page 2 ---\nbeta"
        );
    }

    #[test]
    fn normalize_sorts_fills_and_drops() {
        let results = vec![
            PageResult::ok(3, "three"),
            PageResult::ok(1, "one"),
            PageResult::ok(1, "duplicate"),
            PageResult::ok(9, "out of range"),
        ];
        let pages = normalize_pages(results, 3);
        let nums: Vec<usize> = pages.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2, 3]);
        assert_eq!(pages[0].text, "one");
        assert_eq!(pages[1].error, Some(PageError::Missing { page: 2 }));
        assert_eq!(pages[2].text, "three");
    }

    #[test]
    fn normalize_empty_document() {
        assert!(normalize_pages(vec![PageResult::ok(1, "x")], 0).is_empty());
    }

    #[test]
    fn split_recovers_pages_including_blank_ones() {
        let pages = vec![
            PageResult::ok(1, "first\nline"),
            PageResult::ok(2, ""),
            PageResult::ok(3, "third"),
        ];
        let parsed = split_marked_text(&assemble_text(&pages));
        assert_eq!(
            parsed,
            vec![
                (1, "first\nline".to_string()),
                (2, String::new()),
                (3, "third".to_string())
            ]
        );
    }

    #[test]
    fn split_without_markers_is_empty() {
        assert!(split_marked_text("just text").is_empty());
    }
}
