//! # scannio
//!
//! Turn PDFs into plain text or EPUB, reading the embedded text layer when
//! every page has one and falling back to OCR for the whole document when
//! any page does not.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Text layer  every page has text? → done, no OCR
//!  ├─ 2. Render      rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Recognise   tesseract pool / LM Studio / Gemini / Mistral / Paddle
//!  ├─ 4. Assemble    one result per page, ascending, `--- Page N ---` markers
//!  └─ 5. Export      TXT or EPUB, written atomically
//! ```
//!
//! Jobs run on a background worker owned by [`ConversionService`]. Each job
//! has its own progress stream and cancel token; cancelling one job never
//! touches another.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scannio::{ConversionConfig, ConversionService, OcrEngine, Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::spawn(Arc::new(Orchestrator::pdfium()));
//!     let config = ConversionConfig::builder()
//!         .engine(OcrEngine::Tesseract)
//!         .languages(["eng", "deu"])
//!         .build()?;
//!
//!     let pdf = scannio::pipeline::input::load_pdf("scan.pdf".as_ref()).await?;
//!     let handle = service.submit(pdf, config)?;
//!     let output = handle
//!         .wait_with_progress(|event| eprintln!("{}", event.text))
//!         .await?;
//!     println!("{}", output.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scannio` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## Engines
//!
//! | Engine | Tag | Needs |
//! |--------|-----|-------|
//! | Tesseract | `tesseract` | `tesseract` binary + language data |
//! | LM Studio | `lmstudio` | OpenAI-compatible endpoint with a vision model |
//! | Google Gemini | `google` | `GOOGLE_API_KEY` |
//! | Mistral OCR | `mistral` | `MISTRAL_API_KEY` |
//! | PaddleOCR | `paddle` | a command printing PaddleOCR JSON |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod ocr;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{parse_languages, ConversionConfig, ConversionConfigBuilder, OcrEngine, OutputFormat};
pub use error::{ConversionError, PageError};
pub use job::{cancel_pair, CancelHandle, CancelToken, ConversionJob, JobId, JobState};
pub use ocr::{BackendRegistry, Granularity, OcrBackend, RecognitionContext, RecognitionInput};
pub use orchestrator::Orchestrator;
pub use output::{
    assemble_text, page_marker, ConversionOutput, ConversionStats, ExtractionSource, PageImage,
    PageResult,
};
pub use progress::{ProgressEvent, ProgressReporter, ProgressSink};
pub use registry::JobRegistry;
pub use service::{ConversionService, JobHandle, SavedOutput};
