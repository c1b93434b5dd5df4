//! Error types for the scannio library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConversionError`] is **fatal**: the job cannot produce a document
//!   (bad configuration, unreadable PDF, render failure, a whole-document
//!   backend that failed, cancellation, a crashed worker). Returned as
//!   `Err(ConversionError)` from the orchestrator and the service.
//!
//! * [`PageError`] is **non-fatal**: a single page could not be recognised
//!   (transport glitch, external process crash, garbage output). Stored inside
//!   [`crate::output::PageResult`]; the page degrades to empty text and the
//!   job carries on.
//!
//! Page-level failures never cross the OCR adapter boundary as `Err`.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scannio library.
#[derive(Debug, Error)]
pub enum ConversionError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder or request validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The selected engine needs a credential that was not supplied.
    #[error("Missing {credential} for the '{engine}' OCR engine.\nEnter it in the settings or pass it on the command line.")]
    MissingCredential {
        engine: String,
        credential: &'static str,
    },

    /// The engine tag does not match any registered backend.
    #[error("Unknown OCR engine '{0}'")]
    UnknownEngine(String),

    /// The backend's local dependencies are missing (binary, language data).
    #[error("OCR engine '{engine}' is not available: {hint}")]
    BackendUnavailable { engine: String, hint: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The buffer does not start with the `%PDF` magic bytes.
    #[error("Input is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The PDF could not be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF")]
    WrongPassword,

    /// Reading the embedded text layer failed (not the same as "absent").
    #[error("Text-layer extraction failed on page {page}: {detail}")]
    TextLayerFailed { page: usize, detail: String },

    /// pdfium failed on one page; the whole job is aborted.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Install libpdfium system-wide or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── Backend errors ────────────────────────────────────────────────────
    /// A whole-document backend failed; there is nothing to degrade to.
    #[error("{engine} OCR failed: {message}")]
    Backend { engine: String, message: String },

    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// The job was cancelled by the user.
    #[error("Conversion cancelled")]
    Cancelled,

    /// The background execution context died while the job was pending.
    #[error("A fatal worker error occurred.")]
    WorkerCrashed,

    /// The background execution context died earlier and was not restarted.
    #[error("The conversion worker is not running; restart the service")]
    WorkerUnavailable,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConversionError {
    /// `true` for user-triggered cancellation, which callers should not
    /// report as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConversionError::Cancelled)
    }

    /// `true` for errors raised before any work started.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ConversionError::InvalidConfig(_)
                | ConversionError::MissingCredential { .. }
                | ConversionError::UnknownEngine(_)
        )
    }

    pub(crate) fn backend(engine: impl Into<String>, message: impl Into<String>) -> Self {
        ConversionError::Backend {
            engine: engine.into(),
            message: message.into(),
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The recognition engine rejected the page.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// Network call failed after retries.
    #[error("Page {page}: request failed after {retries} retries: {detail}")]
    TransportFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// External OCR process exited unsuccessfully or could not start.
    #[error("Page {page}: OCR process failed (exit code {code:?}): {stderr}")]
    ProcessFailed {
        page: usize,
        code: Option<i32>,
        stderr: String,
    },

    /// External OCR process printed something we could not parse.
    #[error("Page {page}: unreadable OCR output: {detail}")]
    MalformedOutput { page: usize, detail: String },

    /// A whole-document backend returned nothing for this page.
    #[error("Page {page}: no text returned by the OCR engine")]
    Missing { page: usize },

    /// The call timed out.
    #[error("Page {page}: timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RecognitionFailed { page, .. }
            | PageError::TransportFailed { page, .. }
            | PageError::ProcessFailed { page, .. }
            | PageError::MalformedOutput { page, .. }
            | PageError::Missing { page }
            | PageError::Timeout { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_a_config_error() {
        let e = ConversionError::Cancelled;
        assert!(e.is_cancellation());
        assert!(!e.is_config_error());
        assert_eq!(e.to_string(), "Conversion cancelled");
    }

    #[test]
    fn missing_credential_display() {
        let e = ConversionError::MissingCredential {
            engine: "gemini".into(),
            credential: "Google API key",
        };
        let msg = e.to_string();
        assert!(msg.contains("gemini"), "got: {msg}");
        assert!(msg.contains("Google API key"), "got: {msg}");
        assert!(e.is_config_error());
    }

    #[test]
    fn worker_crash_uses_generic_message() {
        assert_eq!(
            ConversionError::WorkerCrashed.to_string(),
            "A fatal worker error occurred."
        );
    }

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::ProcessFailed {
            page: 7,
            code: Some(1),
            stderr: "boom".into(),
        };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().contains("Page 7"));
    }
}
