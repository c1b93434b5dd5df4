//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! pdfium is not async-safe, so the work runs in `spawn_blocking`. The
//! cancel token is checked between pages; a failure on any page aborts the
//! whole render, since recognition without every page is meaningless.

use crate::error::ConversionError;
use crate::job::{CancelToken, PdfBytes};
use crate::output::PageImage;
use crate::pipeline::pdfium::{bind_pdfium, open_document};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Parameters for one render pass.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Upscaling factor relative to the page's natural size.
    pub scale: f32,
    pub password: Option<String>,
}

/// Turns PDF bytes into ordered page images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages, without rasterising anything.
    async fn page_count(&self, pdf: &PdfBytes, password: Option<&str>)
        -> Result<usize, ConversionError>;

    /// Rasterise every page, in page order, numbered from 1.
    async fn render(
        &self,
        pdf: &PdfBytes,
        options: &RenderOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<PageImage>, ConversionError>;
}

/// The production renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRenderer;

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn page_count(
        &self,
        pdf: &PdfBytes,
        password: Option<&str>,
    ) -> Result<usize, ConversionError> {
        let pdf = pdf.clone();
        let password = password.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = open_document(&pdfium, &pdf, password.as_deref())?;
            Ok::<_, ConversionError>(document.pages().len() as usize)
        })
        .await
        .map_err(|e| ConversionError::Internal(format!("Page count task panicked: {e}")))?
    }

    async fn render(
        &self,
        pdf: &PdfBytes,
        options: &RenderOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<PageImage>, ConversionError> {
        let pdf = pdf.clone();
        let options = options.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || render_pages_blocking(&pdf, &options, &cancel))
            .await
            .map_err(|e| ConversionError::Internal(format!("Render task panicked: {e}")))?
    }
}

fn render_pages_blocking(
    pdf: &[u8],
    options: &RenderOptions,
    cancel: &CancelToken,
) -> Result<Vec<PageImage>, ConversionError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf, options.password.as_deref())?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(options.scale);
    let mut results = Vec::with_capacity(total_pages);

    for (idx, page) in pages.iter().enumerate() {
        cancel.check()?;
        let page_num = idx + 1;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ConversionError::RasterisationFailed {
                page: page_num,
                detail: e.to_string(),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );
        results.push(PageImage::new(page_num, image));
    }

    Ok(results)
}
