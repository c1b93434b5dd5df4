//! Conversion Job Orchestrator.
//!
//! Owns one [`ConversionJob`] from `pending` to a terminal state:
//!
//! ```text
//! pending ─▶ text layer ─(complete)────────────────────────────────▶ done
//!               └─(missing)─▶ rendering ─▶ recognizing ─▶ assembling ─▶ done
//! ```
//!
//! Page engines get rasterised pages, document engines get the PDF bytes and
//! the page count. Whatever comes back is normalised to exactly one result
//! per page, ascending, before the marker text is assembled.

use crate::error::ConversionError;
use crate::job::{CancelToken, ConversionJob, JobState};
use crate::ocr::{BackendRegistry, Granularity, OcrBackend, RecognitionContext, RecognitionInput};
use crate::output::{
    assemble_text, normalize_pages, ConversionOutput, ConversionStats, ExtractionSource,
    PageResult,
};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer, RenderOptions};
use crate::pipeline::textlayer::{PdfiumTextLayer, TextLayer, TextLayerExtractor};
use crate::progress::ProgressReporter;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs jobs against a renderer, a text-layer extractor and a set of engines.
#[derive(Clone)]
pub struct Orchestrator {
    renderer: Arc<dyn PageRenderer>,
    text_layer: Arc<dyn TextLayerExtractor>,
    backends: BackendRegistry,
}

impl Orchestrator {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        text_layer: Arc<dyn TextLayerExtractor>,
        backends: BackendRegistry,
    ) -> Self {
        Self {
            renderer,
            text_layer,
            backends,
        }
    }

    /// Pdfium for rendering and text, the five production engines.
    pub fn pdfium() -> Self {
        Self::new(
            Arc::new(PdfiumRenderer),
            Arc::new(PdfiumTextLayer),
            BackendRegistry::with_defaults(),
        )
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Run `job` to completion.
    ///
    /// On return the job is in `done`, `failed` or `cancelled`. Per-page
    /// recognition failures do not fail the job; they show up as empty pages
    /// with an error note in [`ConversionOutput::pages`].
    pub async fn run(
        &self,
        job: &mut ConversionJob,
        reporter: &ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ConversionOutput, ConversionError> {
        let started = Instant::now();
        info!("{}: starting with engine {}", job.id, job.config.engine);

        match self.execute(job, reporter, cancel, started).await {
            Ok(output) => {
                job.transition(JobState::Done);
                info!(
                    "{}: done, {} pages ({} failed) in {}ms",
                    job.id,
                    output.stats.total_pages,
                    output.stats.failed_pages,
                    output.stats.total_duration_ms
                );
                Ok(output)
            }
            Err(e) if e.is_cancellation() => {
                job.transition(JobState::Cancelled);
                info!("{}: cancelled", job.id);
                Err(e)
            }
            Err(e) => {
                job.transition(JobState::Failed);
                warn!("{}: failed: {}", job.id, e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &mut ConversionJob,
        reporter: &ProgressReporter,
        cancel: &CancelToken,
        started: Instant,
    ) -> Result<ConversionOutput, ConversionError> {
        // ── Step 1: Configuration ────────────────────────────────────────────
        job.config.validate()?;
        let backend = self.backends.resolve(&job.config)?;
        cancel.check()?;

        let pdf = Arc::clone(&job.pdf);
        let password = job.config.password.clone();

        // ── Step 2: Text layer ───────────────────────────────────────────────
        if job.config.force_ocr {
            debug!("{}: text layer skipped (force_ocr)", job.id);
        } else {
            reporter.report("Checking for text layer in PDF...");
            let layer = cancel
                .run(self.text_layer.extract(&pdf, password.as_deref()))
                .await??;
            match layer {
                TextLayer::Complete(pages) => {
                    reporter.report("Text layer found! Extracting text directly.");
                    job.transition(JobState::Assembling);
                    let page_count = pages.len();
                    let pages = normalize_pages(pages, page_count);
                    return Ok(ConversionOutput {
                        text: assemble_text(&pages),
                        stats: ConversionStats {
                            total_pages: page_count,
                            failed_pages: 0,
                            total_duration_ms: started.elapsed().as_millis() as u64,
                            ..ConversionStats::default()
                        },
                        pages,
                        source: ExtractionSource::TextLayer,
                    });
                }
                TextLayer::Missing { page } => {
                    debug!("{}: page {} has no text layer", job.id, page);
                }
            }
        }
        reporter.report("No text layer found. Starting OCR process...");

        // ── Step 3: Prepare engine input ─────────────────────────────────────
        let render_started = Instant::now();
        let (input, page_count) = match backend.granularity() {
            Granularity::Page => {
                job.transition(JobState::Rendering);
                reporter.report("Converting PDF to images...");
                let options = RenderOptions {
                    scale: job.config.render_scale,
                    password: password.clone(),
                };
                let images = cancel
                    .run(self.renderer.render(&pdf, &options, cancel))
                    .await??;
                let page_count = images.len();
                (RecognitionInput::Pages(images), page_count)
            }
            Granularity::Document => {
                let page_count = cancel
                    .run(self.renderer.page_count(&pdf, password.as_deref()))
                    .await??;
                (RecognitionInput::Document { pdf, page_count }, page_count)
            }
        };
        let render_duration_ms = render_started.elapsed().as_millis() as u64;
        reporter.report(format!(
            "Found {} pages. Starting OCR with languages: {}...",
            page_count,
            job.config.language_spec()
        ));

        // ── Step 4: Recognise ────────────────────────────────────────────────
        job.transition(JobState::Recognizing);
        let recognition_started = Instant::now();
        let results = recognize(backend.as_ref(), input, reporter, cancel, page_count).await?;
        let recognition_duration_ms = recognition_started.elapsed().as_millis() as u64;

        // ── Step 5: Assemble ─────────────────────────────────────────────────
        job.transition(JobState::Assembling);
        let pages = normalize_pages(results, page_count);
        let failed_pages = pages.iter().filter(|p| p.is_failed()).count();
        for page in pages.iter().filter_map(|p| p.error.as_ref()) {
            warn!("{}: {}", job.id, page);
        }

        Ok(ConversionOutput {
            text: assemble_text(&pages),
            pages,
            source: ExtractionSource::Ocr(backend.engine()),
            stats: ConversionStats {
                total_pages: page_count,
                failed_pages,
                total_duration_ms: started.elapsed().as_millis() as u64,
                render_duration_ms,
                recognition_duration_ms,
            },
        })
    }
}

async fn recognize(
    backend: &dyn OcrBackend,
    input: RecognitionInput,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
    page_count: usize,
) -> Result<Vec<PageResult>, ConversionError> {
    let ctx = RecognitionContext::new(reporter.clone(), cancel.clone(), page_count);
    // Not raced against the token: backends check it themselves and some
    // must finish cleanup after it fires.
    let results = backend.recognize(input, &ctx).await?;
    cancel.check()?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversionConfig, OcrEngine};
    use crate::job::{cancel_pair, JobId};
    use crate::output::PageImage;
    use async_trait::async_trait;
    use image::DynamicImage;

    struct Pages(usize);

    #[async_trait]
    impl PageRenderer for Pages {
        async fn page_count(
            &self,
            _pdf: &crate::job::PdfBytes,
            _password: Option<&str>,
        ) -> Result<usize, ConversionError> {
            Ok(self.0)
        }

        async fn render(
            &self,
            _pdf: &crate::job::PdfBytes,
            _options: &RenderOptions,
            _cancel: &CancelToken,
        ) -> Result<Vec<PageImage>, ConversionError> {
            Ok((1..=self.0)
                .map(|n| PageImage::new(n, DynamicImage::new_rgb8(2, 2)))
                .collect())
        }
    }

    struct NoText;

    #[async_trait]
    impl TextLayerExtractor for NoText {
        async fn extract(
            &self,
            _pdf: &crate::job::PdfBytes,
            _password: Option<&str>,
        ) -> Result<TextLayer, ConversionError> {
            Ok(TextLayer::Missing { page: 1 })
        }
    }

    /// Returns only odd pages, in reverse.
    struct OddPages;

    #[async_trait]
    impl OcrBackend for OddPages {
        fn engine(&self) -> OcrEngine {
            OcrEngine::Paddle
        }

        fn granularity(&self) -> Granularity {
            Granularity::Page
        }

        async fn recognize(
            &self,
            input: RecognitionInput,
            ctx: &RecognitionContext,
        ) -> Result<Vec<PageResult>, ConversionError> {
            let mut out = Vec::new();
            for page in input.into_pages(self.engine())?.iter().rev() {
                ctx.page_finished();
                if page.page_num % 2 == 1 {
                    out.push(PageResult::ok(page.page_num, format!("p{}", page.page_num)));
                }
            }
            Ok(out)
        }
    }

    fn orchestrator(pages: usize) -> Orchestrator {
        let mut backends = BackendRegistry::empty();
        backends.register(OcrEngine::Paddle, |_| Ok(Arc::new(OddPages)));
        Orchestrator::new(Arc::new(Pages(pages)), Arc::new(NoText), backends)
    }

    fn job() -> ConversionJob {
        let config = ConversionConfig::builder()
            .engine(OcrEngine::Paddle)
            .build()
            .unwrap();
        ConversionJob::new(JobId(1), b"%PDF-1.7".to_vec(), config)
    }

    #[tokio::test]
    async fn gaps_in_engine_output_become_missing_pages() {
        let mut job = job();
        let reporter = ProgressReporter::silent(job.id);
        let output = orchestrator(3)
            .run(&mut job, &reporter, &CancelToken::none())
            .await
            .unwrap();

        assert_eq!(job.state(), JobState::Done);
        assert_eq!(output.text, "\n--- Page 1 ---\np1\n--- Page 2 ---\n\n--- Page 3 ---\np3");
        assert_eq!(output.stats.failed_pages, 1);
        assert_eq!(output.source, ExtractionSource::Ocr(OcrEngine::Paddle));
    }

    #[tokio::test]
    async fn config_errors_fail_before_any_work() {
        let mut job = job();
        job.config.paddle_command.clear();
        let reporter = ProgressReporter::silent(job.id);
        let err = orchestrator(1)
            .run(&mut job, &reporter, &CancelToken::none())
            .await
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(job.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn pre_cancelled_job_ends_cancelled() {
        let mut job = job();
        let (handle, token) = cancel_pair();
        handle.cancel();
        let reporter = ProgressReporter::silent(job.id);
        let err = orchestrator(2)
            .run(&mut job, &reporter, &token)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(job.state(), JobState::Cancelled);
    }
}
