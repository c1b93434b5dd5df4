//! Tesseract engine for the local pool.
//!
//! Each pool slot owns one [`TesseractEngine`] with its own scratch
//! directory. Pages are written there as PNG and handed to the `tesseract`
//! CLI; the child is killed if the job is cancelled mid-page.

use crate::config::{ConversionConfig, OcrEngine};
use crate::error::{ConversionError, PageError};
use crate::ocr::pool::{EngineFactory, RecognitionEngine};
use crate::output::PageImage;
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

/// Starts [`TesseractEngine`]s with a fixed language set.
#[derive(Debug, Clone)]
pub struct TesseractFactory {
    binary: PathBuf,
    languages: Vec<String>,
}

impl TesseractFactory {
    pub fn new(binary: impl Into<PathBuf>, languages: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            languages,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(config.tesseract_binary.clone(), config.languages.clone())
    }

    fn unavailable(hint: impl Into<String>) -> ConversionError {
        ConversionError::BackendUnavailable {
            engine: OcrEngine::Tesseract.to_string(),
            hint: hint.into(),
        }
    }

    /// Ask the binary which language models are installed.
    async fn installed_languages(&self) -> Result<Vec<String>, ConversionError> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Self::unavailable(format!(
                        "'{}' not found (install tesseract-ocr)",
                        self.binary.display()
                    ))
                } else {
                    Self::unavailable(e.to_string())
                }
            })?;
        if !output.status.success() {
            return Err(Self::unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        // Older releases print the list on stderr.
        let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
        listing.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_list_langs(&listing))
    }
}

#[async_trait]
impl EngineFactory for TesseractFactory {
    fn engine(&self) -> OcrEngine {
        OcrEngine::Tesseract
    }

    async fn spawn(&self, slot: usize) -> Result<Box<dyn RecognitionEngine>, ConversionError> {
        let installed = self.installed_languages().await?;
        let missing = missing_languages(&self.languages, &installed);
        if !missing.is_empty() {
            return Err(Self::unavailable(format!(
                "language data not installed: {} (install tesseract-ocr-{})",
                missing.join(", "),
                missing[0]
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix("scannio-ocr-")
            .tempdir()
            .map_err(|e| ConversionError::Internal(format!("scratch dir: {e}")))?;
        debug!("Tesseract slot {} ready in {}", slot, scratch.path().display());

        Ok(Box::new(TesseractEngine {
            binary: self.binary.clone(),
            language_spec: self.languages.join("+"),
            scratch: Some(scratch),
        }))
    }
}

/// One Tesseract "worker": a language spec plus a private scratch directory.
pub struct TesseractEngine {
    binary: PathBuf,
    language_spec: String,
    scratch: Option<TempDir>,
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    async fn recognize(&mut self, page: &PageImage) -> Result<String, PageError> {
        let page_num = page.page_num;
        let scratch = self.scratch.as_ref().ok_or_else(|| PageError::RecognitionFailed {
            page: page_num,
            detail: "engine already terminated".into(),
        })?;

        let png = encode_png(&page.image).map_err(|e| PageError::RecognitionFailed {
            page: page_num,
            detail: format!("PNG encoding failed: {e}"),
        })?;
        let image_path = scratch.path().join(format!("page-{page_num}.png"));
        tokio::fs::write(&image_path, &png)
            .await
            .map_err(|e| PageError::RecognitionFailed {
                page: page_num,
                detail: format!("failed to write page image: {e}"),
            })?;

        let output = Command::new(&self.binary)
            .arg(&image_path)
            .arg("stdout")
            .args(["-l", &self.language_spec])
            .kill_on_drop(true)
            .output()
            .await;
        let _ = tokio::fs::remove_file(&image_path).await;

        let output = output.map_err(|e| PageError::ProcessFailed {
            page: page_num,
            code: None,
            stderr: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(PageError::ProcessFailed {
                page: page_num,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn terminate(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                debug!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Language codes from `tesseract --list-langs` output.
pub fn parse_list_langs(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of available languages"))
        .filter(|l| !l.contains(' '))
        .map(str::to_string)
        .collect()
}

/// Requested languages that are not installed.
pub fn missing_languages(requested: &[String], installed: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|lang| !installed.iter().any(|i| i == *lang))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "List of available languages in \"/usr/share/tesseract-ocr/5/tessdata/\" (3):\neng\ndeu\nosd\n";

    #[test]
    fn parses_language_listing() {
        assert_eq!(parse_list_langs(LISTING), vec!["eng", "deu", "osd"]);
    }

    #[test]
    fn reports_missing_languages() {
        let installed = parse_list_langs(LISTING);
        let requested = vec!["eng".to_string(), "fra".to_string()];
        assert_eq!(missing_languages(&requested, &installed), vec!["fra"]);
    }

    #[tokio::test]
    async fn missing_binary_is_backend_unavailable() {
        let factory = TesseractFactory::new(
            "/nonexistent/bin/tesseract-scannio-test",
            vec!["eng".to_string()],
        );
        let err = match factory.spawn(0).await {
            Ok(_) => panic!("spawn should fail without a binary"),
            Err(e) => e,
        };
        assert!(matches!(err, ConversionError::BackendUnavailable { .. }));
    }
}
