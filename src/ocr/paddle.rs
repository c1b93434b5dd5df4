//! PaddleOCR through an external command.
//!
//! Each page is written to a temporary PNG and the configured command is run
//! with that path appended as its last argument. The command prints JSON on
//! stdout: either `{"rec_texts": [...]}`, the legacy nested
//! `[[[box, [text, confidence]], ...]]` list, or `{"error": "..."}`.
//! Anything else fails only that page.

use crate::config::{ConversionConfig, OcrEngine};
use crate::error::{ConversionError, PageError};
use crate::ocr::{Granularity, OcrBackend, RecognitionContext, RecognitionInput};
use crate::output::{PageImage, PageResult};
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of one child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a program to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput>;
}

/// [`ProcessRunner`] on `tokio::process`. The child is killed when the
/// future is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput> {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub struct PaddleBackend {
    runner: Arc<dyn ProcessRunner>,
    command: Vec<String>,
}

impl PaddleBackend {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::with_runner(Arc::new(TokioProcessRunner), config)
    }

    pub fn with_runner(runner: Arc<dyn ProcessRunner>, config: &ConversionConfig) -> Self {
        Self {
            runner,
            command: config.paddle_command.clone(),
        }
    }

    async fn process_page(&self, program: &str, base_args: &[String], page: &PageImage) -> PageResult {
        match self.run_page(program, base_args, page).await {
            Ok(text) => PageResult::ok(page.page_num, text),
            Err(e) => {
                warn!("PaddleOCR failed on page {}: {}", page.page_num, e);
                PageResult::failed(page.page_num, e)
            }
        }
    }

    async fn run_page(
        &self,
        program: &str,
        base_args: &[String],
        page: &PageImage,
    ) -> Result<String, PageError> {
        let page_num = page.page_num;
        let png = encode_png(&page.image).map_err(|e| PageError::RecognitionFailed {
            page: page_num,
            detail: format!("PNG encoding failed: {e}"),
        })?;

        // Removed when dropped, including when the job is cancelled mid-run.
        let image_file = tempfile::Builder::new()
            .prefix("scannio-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| PageError::RecognitionFailed {
                page: page_num,
                detail: format!("failed to create page image: {e}"),
            })?;
        tokio::fs::write(image_file.path(), &png)
            .await
            .map_err(|e| PageError::RecognitionFailed {
                page: page_num,
                detail: format!("failed to write page image: {e}"),
            })?;

        let mut args = base_args.to_vec();
        args.push(image_file.path().to_string_lossy().into_owned());
        debug!("Running {} {:?} for page {}", program, args, page_num);

        let output = self
            .runner
            .run(program, &args)
            .await
            .map_err(|e| PageError::ProcessFailed {
                page: page_num,
                code: None,
                stderr: e.to_string(),
            })?;
        if !output.success() {
            return Err(PageError::ProcessFailed {
                page: page_num,
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        parse_paddle_output(page_num, &output.stdout)
    }
}

#[async_trait]
impl OcrBackend for PaddleBackend {
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
        let pages = input.into_pages(self.engine())?;
        let (program, base_args) = self.command.split_first().ok_or_else(|| {
            ConversionError::InvalidConfig("PaddleOCR command is empty".into())
        })?;

        let mut results = Vec::with_capacity(pages.len());
        for page in &pages {
            ctx.cancel.check()?;
            let result = ctx
                .cancel
                .run(self.process_page(program, base_args, page))
                .await?;
            results.push(result);
            ctx.page_finished();
        }
        Ok(results)
    }
}

/// Extract the recognised text from the command's stdout.
///
/// Lines are joined with `\n`. A JSON `null` (or a `null` page in the legacy
/// format) means nothing was detected.
pub fn parse_paddle_output(page: usize, stdout: &str) -> Result<String, PageError> {
    let malformed = |detail: &str| PageError::MalformedOutput {
        page,
        detail: detail.to_string(),
    };

    let value: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| malformed(&format!("stdout is not JSON: {e}")))?;

    let mut lines = Vec::new();
    match &value {
        Value::Null => {}
        Value::Object(map) => {
            if let Some(error) = map.get("error") {
                let detail = error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(PageError::RecognitionFailed { page, detail });
            }
            collect_rec_texts(&value, &mut lines).ok_or_else(|| malformed("missing rec_texts"))?;
        }
        Value::Array(pages) => {
            for entry in pages {
                match entry {
                    Value::Null => {}
                    Value::Object(_) => collect_rec_texts(entry, &mut lines)
                        .ok_or_else(|| malformed("missing rec_texts"))?,
                    Value::Array(detections) => {
                        for detection in detections {
                            let text = detection
                                .get(1)
                                .and_then(|t| t.get(0))
                                .and_then(Value::as_str)
                                .ok_or_else(|| malformed("unexpected detection shape"))?;
                            lines.push(text.to_string());
                        }
                    }
                    _ => return Err(malformed("unexpected page entry")),
                }
            }
        }
        _ => return Err(malformed("unexpected top-level JSON value")),
    }
    Ok(lines.join("\n"))
}

fn collect_rec_texts(value: &Value, lines: &mut Vec<String>) -> Option<()> {
    let texts = value.get("rec_texts")?.as_array()?;
    for text in texts {
        lines.push(text.as_str()?.to_string());
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CancelToken, JobId};
    use crate::progress::ProgressReporter;
    use image::DynamicImage;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Answers from a per-page script and records what it was asked.
    struct FakeRunner {
        replies: Mutex<Vec<ProcessOutput>>,
        seen: Mutex<Vec<(String, Vec<String>, bool)>>,
    }

    impl FakeRunner {
        fn new(replies: Vec<ProcessOutput>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput> {
            let image_exists = args.last().map(|p| Path::new(p).exists()).unwrap_or(false);
            self.seen
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec(), image_exists));
            Ok(self.replies.lock().unwrap().remove(0))
        }
    }

    fn ok_json(json: &str) -> ProcessOutput {
        ProcessOutput {
            code: Some(0),
            stdout: json.to_string(),
            stderr: String::new(),
        }
    }

    fn page(n: usize) -> PageImage {
        PageImage::new(n, DynamicImage::new_rgb8(4, 4))
    }

    fn backend(runner: Arc<FakeRunner>) -> PaddleBackend {
        let config = ConversionConfig::builder()
            .engine(OcrEngine::Paddle)
            .paddle_command(["python3", "run_paddleocr.py"])
            .build()
            .unwrap();
        PaddleBackend::with_runner(runner, &config)
    }

    #[test]
    fn parses_rec_texts() {
        let text = parse_paddle_output(1, r#"{"rec_texts": ["Hello", "World"]}"#).unwrap();
        assert_eq!(text, "Hello\nWorld");
    }

    #[test]
    fn parses_legacy_nested_format() {
        let stdout = r#"[[[[[0,0],[1,0],[1,1],[0,1]], ["Line one", 0.98]],
                          [[[0,2],[1,2],[1,3],[0,3]], ["Line two", 0.91]]]]"#;
        assert_eq!(parse_paddle_output(1, stdout).unwrap(), "Line one\nLine two");
        assert_eq!(parse_paddle_output(1, "[null]").unwrap(), "");
    }

    #[test]
    fn error_object_is_recognition_failure() {
        let err = parse_paddle_output(3, r#"{"error": "model not found"}"#).unwrap_err();
        assert_eq!(
            err,
            PageError::RecognitionFailed {
                page: 3,
                detail: "model not found".into()
            }
        );
    }

    #[test]
    fn non_json_or_missing_field_is_malformed() {
        assert!(matches!(
            parse_paddle_output(1, "Traceback (most recent call last):"),
            Err(PageError::MalformedOutput { page: 1, .. })
        ));
        assert!(matches!(
            parse_paddle_output(2, r#"{"texts": ["x"]}"#),
            Err(PageError::MalformedOutput { page: 2, .. })
        ));
    }

    #[tokio::test]
    async fn failing_page_does_not_abort_the_job() {
        let runner = Arc::new(FakeRunner::new(vec![
            ok_json(r#"{"rec_texts": ["first"]}"#),
            ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "ImportError: paddleocr\n".into(),
            },
            ok_json("not json"),
        ]));
        let ctx = RecognitionContext::new(ProgressReporter::silent(JobId(1)), CancelToken::none(), 3);
        let results = backend(runner.clone())
            .recognize(RecognitionInput::Pages(vec![page(1), page(2), page(3)]), &ctx)
            .await
            .unwrap();

        assert_eq!(results[0], PageResult::ok(1, "first"));
        assert_eq!(
            results[1].error,
            Some(PageError::ProcessFailed {
                page: 2,
                code: Some(1),
                stderr: "ImportError: paddleocr".into()
            })
        );
        assert!(matches!(results[2].error, Some(PageError::MalformedOutput { page: 3, .. })));
        assert_eq!(ctx.completed(), 3);

        let seen = runner.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        for (program, args, image_existed) in &seen {
            assert_eq!(program, "python3");
            assert_eq!(args[0], "run_paddleocr.py");
            assert!(image_existed, "page image must exist while the command runs");
            assert!(!PathBuf::from(&args[1]).exists(), "page image must be removed");
        }
    }

    #[tokio::test]
    async fn document_input_is_rejected() {
        let runner = Arc::new(FakeRunner::new(Vec::new()));
        let ctx = RecognitionContext::new(ProgressReporter::silent(JobId(1)), CancelToken::none(), 1);
        let input = RecognitionInput::Document {
            pdf: b"%PDF".to_vec().into(),
            page_count: 1,
        };
        assert!(backend(runner).recognize(input, &ctx).await.is_err());
    }
}
