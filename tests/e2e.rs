//! End-to-end tests for scannio.
//!
//! These use real PDF files in `./test_cases/`, a pdfium library, and (for
//! the OCR tests) a local `tesseract` or live API credentials. They are gated
//! behind the `E2E_ENABLED` environment variable so they do not run in CI
//! unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture

use scannio::pipeline::input::load_pdf;
use scannio::{
    ConversionConfig, ConversionError, ConversionService, ExtractionSource, OcrEngine,
    Orchestrator, OutputFormat,
};
use std::path::PathBuf;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Assert the marker text is well-formed for `pages` pages.
fn assert_marked_text(text: &str, pages: usize, context: &str) {
    for n in 1..=pages {
        let marker = format!("\n--- Page {n} ---\n");
        assert!(text.contains(&marker), "[{context}] missing marker for page {n}");
    }
    assert!(
        !text.contains(&format!("\n--- Page {} ---\n", pages + 1)),
        "[{context}] marker beyond the last page"
    );
    let invisible = ['\u{200B}', '\u{FEFF}'];
    for ch in invisible {
        assert!(
            !text.contains(ch),
            "[{context}] output contains invisible char U+{:04X}",
            ch as u32
        );
    }
    println!("[{context}] ✓  {} bytes, {pages} page markers", text.len());
}

fn service() -> ConversionService {
    ConversionService::spawn(Arc::new(Orchestrator::pdfium()))
}

// ── Input checks (no engine) ─────────────────────────────────────────────────

#[tokio::test]
async fn test_load_nonexistent() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }
    let err = load_pdf("/definitely/not/a/real/file.pdf".as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::FileNotFound { .. }));
}

// ── Text layer ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_text_layer_pdf_skips_ocr() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("born_digital.pdf"));
    let pdf = load_pdf(&path).await.expect("load");

    let config = ConversionConfig::builder().build().expect("valid config");
    let output = service()
        .submit(pdf, config)
        .expect("submit")
        .wait()
        .await
        .expect("conversion should succeed");

    assert_eq!(output.source, ExtractionSource::TextLayer);
    assert_marked_text(&output.text, output.stats.total_pages, "text-layer");
}

// ── OCR ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tesseract_scanned_pdf_to_epub() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("scanned.pdf"));
    let pdf = load_pdf(&path).await.expect("load");
    let out_path = output_dir().join("scanned.epub");

    let config = ConversionConfig::builder()
        .engine(OcrEngine::Tesseract)
        .languages(["eng"])
        .output_format(OutputFormat::Epub)
        .force_ocr(true)
        .build()
        .expect("valid config");

    let mut lines = Vec::new();
    let saved = service()
        .convert_to_file(pdf, config, Some(out_path.clone()), |l| {
            println!("{l}");
            lines.push(l.to_string())
        })
        .await
        .expect("conversion should succeed");

    assert_eq!(saved.source, ExtractionSource::Ocr(OcrEngine::Tesseract));
    assert_eq!(saved.stats.failed_pages, 0, "no page should fail");
    assert_eq!(lines.last().map(String::as_str), Some("Done!"));

    let bytes = std::fs::read(&out_path).expect("epub written");
    assert_eq!(&bytes[..2], b"PK", "EPUB must be a zip container");
}

#[tokio::test]
async fn test_gemini_scanned_pdf() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("scanned.pdf"));
    let Ok(key) = std::env::var("GOOGLE_API_KEY") else {
        println!("SKIP: GOOGLE_API_KEY not set");
        return;
    };
    let pdf = load_pdf(&path).await.expect("load");

    let config = ConversionConfig::builder()
        .engine(OcrEngine::Gemini)
        .google_api_key(key)
        .force_ocr(true)
        .build()
        .expect("valid config");

    let output = service()
        .submit(pdf, config)
        .expect("submit")
        .wait()
        .await
        .expect("conversion should succeed");

    assert_marked_text(&output.text, output.stats.total_pages, "gemini");
    std::fs::write(output_dir().join("scanned_gemini.txt"), &output.text).ok();
}

#[tokio::test]
async fn test_mistral_scanned_pdf() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("scanned.pdf"));
    let Ok(key) = std::env::var("MISTRAL_API_KEY") else {
        println!("SKIP: MISTRAL_API_KEY not set");
        return;
    };
    let pdf = load_pdf(&path).await.expect("load");

    let config = ConversionConfig::builder()
        .engine(OcrEngine::Mistral)
        .mistral_api_key(key)
        .force_ocr(true)
        .build()
        .expect("valid config");

    let output = service()
        .submit(pdf, config)
        .expect("submit")
        .wait()
        .await
        .expect("conversion should succeed");

    assert_marked_text(&output.text, output.stats.total_pages, "mistral");
}
