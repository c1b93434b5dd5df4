//! Mistral OCR: upload, signed URL, process, delete.
//!
//! The uploaded file is deleted once processing ends, including when the OCR
//! call failed or the job was cancelled while it ran. Page Markdown has its
//! image references stripped; single-character debris becomes an empty page.

use crate::config::{ConversionConfig, OcrEngine};
use crate::error::ConversionError;
use crate::ocr::{
    check_status, http_client, Granularity, OcrBackend, RecognitionContext, RecognitionInput,
    TransportError,
};
use crate::output::PageResult;
use crate::pipeline::postprocess::clean_ocr_markdown;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const API_BASE: &str = "https://api.mistral.ai/v1";

/// Lifetime of the signed URL, in hours.
const SIGNED_URL_EXPIRY_HOURS: u32 = 24;

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OcrRequest {
    pub model: String,
    pub document: DocumentRef,
    pub include_image_base64: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentRef {
    DocumentUrl { document_url: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub pages: Vec<OcrPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrPage {
    /// 0-based page index.
    pub index: usize,
    #[serde(default)]
    pub markdown: String,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

// ── Transport ────────────────────────────────────────────────────────────────

/// The four Mistral endpoints the engine uses.
#[async_trait]
pub trait MistralApi: Send + Sync {
    /// Upload a PDF for OCR; returns the file id.
    async fn upload(&self, file_name: &str, pdf: &[u8]) -> Result<String, TransportError>;

    async fn signed_url(&self, file_id: &str) -> Result<String, TransportError>;

    async fn ocr(&self, request: &OcrRequest) -> Result<OcrResponse, TransportError>;

    async fn delete(&self, file_id: &str) -> Result<(), TransportError>;
}

pub struct HttpMistralApi {
    client: reqwest::Client,
    api_key: String,
}

impl HttpMistralApi {
    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, ConversionError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl MistralApi for HttpMistralApi {
    async fn upload(&self, file_name: &str, pdf: &[u8]) -> Result<String, TransportError> {
        let part = reqwest::multipart::Part::bytes(pdf.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "ocr")
            .part("file", part);
        let response = self
            .client
            .post(format!("{API_BASE}/files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let file: UploadedFile = check_status(response).await?.json().await?;
        Ok(file.id)
    }

    async fn signed_url(&self, file_id: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .get(format!("{API_BASE}/files/{file_id}/url"))
            .query(&[("expiry", SIGNED_URL_EXPIRY_HOURS)])
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let signed: SignedUrl = check_status(response).await?.json().await?;
        Ok(signed.url)
    }

    async fn ocr(&self, request: &OcrRequest) -> Result<OcrResponse, TransportError> {
        let response = self
            .client
            .post(format!("{API_BASE}/ocr"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn delete(&self, file_id: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .delete(format!("{API_BASE}/files/{file_id}"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

// ── Backend ──────────────────────────────────────────────────────────────────

pub struct MistralBackend {
    api: Arc<dyn MistralApi>,
    model: String,
}

fn backend_error(step: &str, e: TransportError) -> ConversionError {
    ConversionError::backend(OcrEngine::Mistral.label(), format!("{step} failed: {e}"))
}

impl MistralBackend {
    pub fn from_config(config: &ConversionConfig) -> Result<Self, ConversionError> {
        let api_key = config
            .mistral_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConversionError::MissingCredential {
                engine: OcrEngine::Mistral.to_string(),
                credential: "Mistral API key",
            })?;
        let api = HttpMistralApi::new(api_key, config.api_timeout_secs)?;
        Ok(Self::with_api(Arc::new(api), config))
    }

    pub fn with_api(api: Arc<dyn MistralApi>, config: &ConversionConfig) -> Self {
        Self {
            api,
            model: config.mistral_model.clone(),
        }
    }

    /// Signed URL + OCR for an already uploaded file.
    async fn process_uploaded(
        &self,
        file_id: &str,
        ctx: &RecognitionContext,
    ) -> Result<OcrResponse, ConversionError> {
        let url = ctx
            .cancel
            .run(self.api.signed_url(file_id))
            .await?
            .map_err(|e| backend_error("signed URL", e))?;

        let request = OcrRequest {
            model: self.model.clone(),
            document: DocumentRef::DocumentUrl { document_url: url },
            include_image_base64: false,
        };
        ctx.cancel
            .run(self.api.ocr(&request))
            .await?
            .map_err(|e| backend_error("OCR", e))
    }
}

/// Turn an OCR response into cleaned, ordered page results.
pub fn pages_from_response(response: OcrResponse) -> Vec<PageResult> {
    let mut pages: Vec<PageResult> = response
        .pages
        .into_iter()
        .map(|p| PageResult::ok(p.index + 1, clean_ocr_markdown(&p.markdown)))
        .collect();
    pages.sort_by_key(|p| p.page_num);
    pages
}

#[async_trait]
impl OcrBackend for MistralBackend {
    fn engine(&self) -> OcrEngine {
        OcrEngine::Mistral
    }

    fn granularity(&self) -> Granularity {
        Granularity::Document
    }

    async fn recognize(
        &self,
        input: RecognitionInput,
        ctx: &RecognitionContext,
    ) -> Result<Vec<PageResult>, ConversionError> {
        let (pdf, page_count) = input.into_document(self.engine())?;
        let file_name = format!("scannio-{}.pdf", ctx.progress.job_id());

        let file_id = ctx
            .cancel
            .run(self.api.upload(&file_name, &pdf))
            .await?
            .map_err(|e| backend_error("upload", e))?;
        info!("Uploaded {} ({} pages) as {}", file_name, page_count, file_id);

        let outcome = self.process_uploaded(&file_id, ctx).await;

        // Cleanup runs on every path and is not raced against cancellation.
        match self.api.delete(&file_id).await {
            Ok(()) => debug!("Deleted uploaded file {}", file_id),
            Err(e) => warn!("Failed to delete uploaded file {}: {}", file_id, e),
        }

        Ok(pages_from_response(outcome?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{cancel_pair, CancelToken, JobId};
    use crate::progress::ProgressReporter;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeApi {
        calls: Mutex<Vec<String>>,
        ocr_reply: Result<OcrResponse, TransportError>,
        ocr_delay: Option<Duration>,
    }

    impl FakeApi {
        fn new(ocr_reply: Result<OcrResponse, TransportError>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                ocr_reply,
                ocr_delay: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MistralApi for FakeApi {
        async fn upload(&self, file_name: &str, _pdf: &[u8]) -> Result<String, TransportError> {
            self.calls.lock().unwrap().push(format!("upload {file_name}"));
            Ok("file-123".into())
        }

        async fn signed_url(&self, file_id: &str) -> Result<String, TransportError> {
            self.calls.lock().unwrap().push(format!("url {file_id}"));
            Ok("https://files.example/signed".into())
        }

        async fn ocr(&self, request: &OcrRequest) -> Result<OcrResponse, TransportError> {
            let DocumentRef::DocumentUrl { document_url } = &request.document;
            self.calls.lock().unwrap().push(format!("ocr {document_url}"));
            if let Some(delay) = self.ocr_delay {
                tokio::time::sleep(delay).await;
            }
            self.ocr_reply.clone()
        }

        async fn delete(&self, file_id: &str) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(format!("delete {file_id}"));
            Ok(())
        }
    }

    fn backend(api: Arc<FakeApi>) -> MistralBackend {
        let config = ConversionConfig::builder()
            .engine(OcrEngine::Mistral)
            .mistral_api_key("k")
            .build()
            .unwrap();
        MistralBackend::with_api(api, &config)
    }

    fn document() -> RecognitionInput {
        RecognitionInput::Document {
            pdf: b"%PDF-1.4".to_vec().into(),
            page_count: 2,
        }
    }

    fn ctx(cancel: CancelToken) -> RecognitionContext {
        RecognitionContext::new(ProgressReporter::silent(JobId(4)), cancel, 2)
    }

    fn response() -> OcrResponse {
        OcrResponse {
            pages: vec![
                OcrPage {
                    index: 1,
                    markdown: ".".into(),
                },
                OcrPage {
                    index: 0,
                    markdown: "# Title\n\n![img-0.jpeg](img-0.jpeg)\nBody".into(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn full_round_trip_cleans_pages_and_deletes_upload() {
        let api = Arc::new(FakeApi::new(Ok(response())));
        let pages = backend(api.clone())
            .recognize(document(), &ctx(CancelToken::none()))
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_num, 1);
        assert_eq!(pages[0].text, "# Title\n\n\nBody");
        assert_eq!(pages[1].text, "");
        assert_eq!(
            api.calls(),
            vec![
                "upload scannio-job-4.pdf",
                "url file-123",
                "ocr https://files.example/signed",
                "delete file-123"
            ]
        );
    }

    #[tokio::test]
    async fn ocr_failure_still_deletes_upload() {
        let api = Arc::new(FakeApi::new(Err(TransportError::Status {
            status: 500,
            body: "boom".into(),
        })));
        let err = backend(api.clone())
            .recognize(document(), &ctx(CancelToken::none()))
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::Backend { .. }));
        assert_eq!(api.calls().last().map(String::as_str), Some("delete file-123"));
    }

    #[tokio::test]
    async fn cancellation_during_ocr_still_deletes_upload() {
        let mut fake = FakeApi::new(Ok(response()));
        fake.ocr_delay = Some(Duration::from_secs(30));
        let api = Arc::new(fake);
        let backend = backend(api.clone());
        let (handle, token) = cancel_pair();
        let context = ctx(token);

        let (out, _) = tokio::join!(backend.recognize(document(), &context), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        assert!(out.unwrap_err().is_cancellation());
        assert_eq!(api.calls().last().map(String::as_str), Some("delete file-123"));
    }

    #[test]
    fn request_shape() {
        let request = OcrRequest {
            model: "mistral-ocr-latest".into(),
            document: DocumentRef::DocumentUrl {
                document_url: "https://x".into(),
            },
            include_image_base64: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["document"]["type"], "document_url");
        assert_eq!(json["document"]["document_url"], "https://x");
        assert_eq!(json["include_image_base64"], false);
    }
}
