//! Embedded text-layer extraction.
//!
//! All or nothing: if any page has an empty text layer, the whole document
//! is handed to OCR. Mixing directly-extracted pages with recognised ones is
//! never done.

use crate::error::ConversionError;
use crate::job::PdfBytes;
use crate::output::PageResult;
use crate::pipeline::pdfium::{bind_pdfium, open_document};
use async_trait::async_trait;
use tracing::debug;

/// Outcome of a text-layer attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TextLayer {
    /// Every page carries text; one result per page, ascending.
    Complete(Vec<PageResult>),
    /// `page` is the first page found without text.
    Missing { page: usize },
}

/// Reads the text embedded in a PDF.
#[async_trait]
pub trait TextLayerExtractor: Send + Sync {
    /// `Err` means the layer could not be read at all, which is fatal.
    /// An absent layer is `Ok(TextLayer::Missing)`.
    async fn extract(
        &self,
        pdf: &PdfBytes,
        password: Option<&str>,
    ) -> Result<TextLayer, ConversionError>;
}

/// pdfium-backed extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumTextLayer;

#[async_trait]
impl TextLayerExtractor for PdfiumTextLayer {
    async fn extract(
        &self,
        pdf: &PdfBytes,
        password: Option<&str>,
    ) -> Result<TextLayer, ConversionError> {
        let pdf = pdf.clone();
        let password = password.map(str::to_string);
        tokio::task::spawn_blocking(move || extract_blocking(&pdf, password.as_deref()))
            .await
            .map_err(|e| ConversionError::Internal(format!("Text layer task panicked: {e}")))?
    }
}

fn extract_blocking(pdf: &[u8], password: Option<&str>) -> Result<TextLayer, ConversionError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf, password)?;

    let mut texts = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let page_num = idx + 1;
        let layer = page.text().map_err(|e| ConversionError::TextLayerFailed {
            page: page_num,
            detail: e.to_string(),
        })?;
        // Only a page without a single text object lacks a layer.
        let text = if layer.chars().len() == 0 {
            String::new()
        } else {
            layer.all()
        };
        texts.push(text);
    }
    Ok(classify_pages(texts))
}

/// Decide between a complete layer and OCR fallback.
///
/// A page falls back only when it has no text at all; whitespace-only text
/// still counts as a layer.
pub fn classify_pages<I>(texts: I) -> TextLayer
where
    I: IntoIterator<Item = String>,
{
    let mut pages = Vec::new();
    for (idx, text) in texts.into_iter().enumerate() {
        let page_num = idx + 1;
        if text.is_empty() {
            debug!("Page {} has no text layer", page_num);
            return TextLayer::Missing { page: page_num };
        }
        pages.push(PageResult::ok(page_num, text));
    }
    TextLayer::Complete(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pages_with_text_is_complete() {
        let layer = classify_pages(vec!["one".to_string(), "two".to_string()]);
        match layer {
            TextLayer::Complete(pages) => {
                assert_eq!(pages.len(), 2);
                assert_eq!(pages[1].page_num, 2);
                assert_eq!(pages[1].text, "two");
            }
            other => panic!("expected complete layer, got {other:?}"),
        }
    }

    #[test]
    fn single_blank_page_forces_ocr() {
        let layer = classify_pages(vec!["one".to_string(), String::new(), "three".to_string()]);
        assert_eq!(layer, TextLayer::Missing { page: 2 });
    }

    #[test]
    fn whitespace_only_page_keeps_the_layer() {
        let layer = classify_pages(vec!["one".to_string(), "  \n ".to_string()]);
        match layer {
            TextLayer::Complete(pages) => {
                assert_eq!(pages.len(), 2);
                assert_eq!(pages[1].text, "  \n ");
            }
            other => panic!("expected complete layer, got {other:?}"),
        }
    }
}
