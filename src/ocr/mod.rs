//! OCR backend abstraction.
//!
//! Every engine implements [`OcrBackend`]: it receives either rasterised pages
//! or the whole PDF and returns one [`PageResult`] per page it produced.
//! Engines are selected once per job by [`BackendRegistry::resolve`], keyed on
//! [`OcrEngine`], so adding a backend never touches the orchestrator.
//!
//! | Engine    | Granularity | Concurrency            | Failure scope |
//! |-----------|-------------|------------------------|---------------|
//! | Tesseract | page        | bounded local pool     | page          |
//! | LM Studio | page        | serial                 | page          |
//! | Gemini    | document    | one request            | job           |
//! | Mistral   | document    | upload/ocr/delete      | job           |
//! | Paddle    | page        | serial, one process    | page          |

pub mod gemini;
pub mod lmstudio;
pub mod mistral;
pub mod paddle;
pub mod pool;
pub mod tesseract;

use crate::config::{ConversionConfig, OcrEngine};
use crate::error::ConversionError;
use crate::job::{CancelToken, PdfBytes};
use crate::output::{PageImage, PageResult};
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What an engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Rasterised page images.
    Page,
    /// The original PDF bytes, in one go.
    Document,
}

/// Input handed to [`OcrBackend::recognize`].
#[derive(Debug)]
pub enum RecognitionInput {
    Pages(Vec<PageImage>),
    Document { pdf: PdfBytes, page_count: usize },
}

impl RecognitionInput {
    /// Rasterised pages, or an error for a page engine handed a document.
    pub fn into_pages(self, engine: OcrEngine) -> Result<Vec<PageImage>, ConversionError> {
        match self {
            RecognitionInput::Pages(pages) => Ok(pages),
            RecognitionInput::Document { .. } => Err(ConversionError::Internal(format!(
                "{engine} expects rendered pages, got a whole document"
            ))),
        }
    }

    /// Whole document, or an error for a document engine handed pages.
    pub fn into_document(self, engine: OcrEngine) -> Result<(PdfBytes, usize), ConversionError> {
        match self {
            RecognitionInput::Document { pdf, page_count } => Ok((pdf, page_count)),
            RecognitionInput::Pages(_) => Err(ConversionError::Internal(format!(
                "{engine} expects the whole document, got rendered pages"
            ))),
        }
    }
}

/// Per-job state shared with the engine while it runs.
pub struct RecognitionContext {
    pub progress: ProgressReporter,
    pub cancel: CancelToken,
    pub total_pages: usize,
    completed: AtomicUsize,
}

impl RecognitionContext {
    pub fn new(progress: ProgressReporter, cancel: CancelToken, total_pages: usize) -> Self {
        Self {
            progress,
            cancel,
            total_pages,
            completed: AtomicUsize::new(0),
        }
    }

    /// Count one more finished page and report it.
    ///
    /// `k` in "Processing page k of N..." is the completion count, not the
    /// page number, so messages stay ascending under concurrency.
    pub fn page_finished(&self) {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress
            .report(format!("Processing page {done} of {}...", self.total_pages));
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// A text-recognition strategy.
///
/// Page-level failures never escape as `Err`: they come back as a
/// [`PageResult`] with empty text and a [`crate::error::PageError`]. `Err` is
/// reserved for failures with nothing to degrade to (a whole-document
/// request, engine start-up, cancellation).
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn engine(&self) -> OcrEngine;

    fn granularity(&self) -> Granularity;

    async fn recognize(
        &self,
        input: RecognitionInput,
        ctx: &RecognitionContext,
    ) -> Result<Vec<PageResult>, ConversionError>;
}

/// Builds a backend for one job from its configuration.
pub type BackendBuilder =
    Arc<dyn Fn(&ConversionConfig) -> Result<Arc<dyn OcrBackend>, ConversionError> + Send + Sync>;

/// Engine tag → backend builder.
#[derive(Clone)]
pub struct BackendRegistry {
    builders: HashMap<OcrEngine, BackendBuilder>,
}

impl BackendRegistry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// The five production engines.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .register(OcrEngine::Tesseract, |config| {
                let factory = tesseract::TesseractFactory::from_config(config);
                Ok(Arc::new(pool::LocalOcrBackend::new(
                    Arc::new(factory),
                    config.max_workers,
                )))
            })
            .register(OcrEngine::LmStudio, |config| {
                Ok(Arc::new(lmstudio::LmStudioBackend::from_config(config)?))
            })
            .register(OcrEngine::Gemini, |config| {
                Ok(Arc::new(gemini::GeminiBackend::from_config(config)?))
            })
            .register(OcrEngine::Mistral, |config| {
                Ok(Arc::new(mistral::MistralBackend::from_config(config)?))
            })
            .register(OcrEngine::Paddle, |config| {
                Ok(Arc::new(paddle::PaddleBackend::from_config(config)))
            });
        registry
    }

    /// Register (or replace) the builder for `engine`.
    pub fn register<F>(&mut self, engine: OcrEngine, builder: F) -> &mut Self
    where
        F: Fn(&ConversionConfig) -> Result<Arc<dyn OcrBackend>, ConversionError>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(engine, Arc::new(builder));
        self
    }

    /// Build the backend selected by `config.engine`.
    pub fn resolve(&self, config: &ConversionConfig) -> Result<Arc<dyn OcrBackend>, ConversionError> {
        let builder = self
            .builders
            .get(&config.engine)
            .ok_or_else(|| ConversionError::UnknownEngine(config.engine.to_string()))?;
        builder(config)
    }

    pub fn contains(&self, engine: OcrEngine) -> bool {
        self.builders.contains_key(&engine)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut engines: Vec<&str> = self.builders.keys().map(OcrEngine::as_str).collect();
        engines.sort_unstable();
        f.debug_struct("BackendRegistry")
            .field("engines", &engines)
            .finish()
    }
}

// ── Network transport ────────────────────────────────────────────────────────

/// Failure of one HTTP exchange with a remote engine.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// HTTP client shared by the network engines of one job.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ConversionError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConversionError::Internal(format!("Failed to create HTTP client: {e}")))
}

/// Turn a non-2xx response into [`TransportError::Status`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body: truncate(&body, 500),
    })
}

/// At most `max` characters of `s`, for error messages.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    struct Fixed(OcrEngine);

    #[async_trait]
    impl OcrBackend for Fixed {
        fn engine(&self) -> OcrEngine {
            self.0
        }

        fn granularity(&self) -> Granularity {
            Granularity::Page
        }

        async fn recognize(
            &self,
            _input: RecognitionInput,
            _ctx: &RecognitionContext,
        ) -> Result<Vec<PageResult>, ConversionError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn registry_resolves_by_engine_tag() {
        let mut registry = BackendRegistry::empty();
        registry.register(OcrEngine::Paddle, |_| Ok(Arc::new(Fixed(OcrEngine::Paddle))));

        let config = ConversionConfig::builder()
            .engine(OcrEngine::Paddle)
            .build()
            .unwrap();
        let backend = registry.resolve(&config).unwrap();
        assert_eq!(backend.engine(), OcrEngine::Paddle);

        let missing = ConversionConfig::default();
        assert!(matches!(
            registry.resolve(&missing),
            Err(ConversionError::UnknownEngine(_))
        ));
    }

    #[test]
    fn defaults_cover_every_engine() {
        let registry = BackendRegistry::with_defaults();
        for engine in OcrEngine::ALL {
            assert!(registry.contains(engine), "{engine} not registered");
        }
    }

    #[test]
    fn page_finished_counts_completions() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RecognitionContext::new(
            ProgressReporter::new(JobId(1), Arc::new(tx)),
            CancelToken::none(),
            3,
        );
        ctx.page_finished();
        ctx.page_finished();
        assert_eq!(ctx.completed(), 2);
        assert_eq!(rx.try_recv().unwrap().text, "Processing page 1 of 3...");
        assert_eq!(rx.try_recv().unwrap().text, "Processing page 2 of 3...");
    }

    #[test]
    fn input_kind_mismatch_is_internal_error() {
        let input = RecognitionInput::Pages(Vec::new());
        assert!(input.into_document(OcrEngine::Gemini).is_err());
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("äöü", 2), "äö…");
        assert_eq!(truncate("abc", 5), "abc");
    }
}
