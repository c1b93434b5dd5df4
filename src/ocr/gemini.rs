//! Google Gemini whole-document OCR.
//!
//! The entire PDF goes inline in a single `generateContent` request together
//! with [`DOCUMENT_OCR_PROMPT`]. The model answers with one sentinel-wrapped
//! block per page, which [`parse_sentinel_pages`] turns back into ordered
//! page results. There is no page to degrade to, so a failed request fails
//! the job.

use crate::config::{ConversionConfig, OcrEngine};
use crate::error::ConversionError;
use crate::ocr::{
    check_status, http_client, Granularity, OcrBackend, RecognitionContext, RecognitionInput,
    TransportError,
};
use crate::output::PageResult;
use crate::prompts::DOCUMENT_OCR_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
pub struct GeminiContent {
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
pub struct GeminiInlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct GeminiGenerationConfig {
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
    #[serde(rename = "supportedGenerationMethods", default)]
    supported_generation_methods: Vec<String>,
}

// ── Transport ────────────────────────────────────────────────────────────────

/// Sends one `generateContent` request and returns the concatenated text.
#[async_trait]
pub trait GeminiTransport: Send + Sync {
    async fn generate(&self, request: &GenerateContentRequest) -> Result<String, TransportError>;
}

pub struct HttpGeminiTransport {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl HttpGeminiTransport {
    pub fn new(
        api_key: impl Into<String>,
        model: &str,
        timeout_secs: u64,
    ) -> Result<Self, ConversionError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key: api_key.into(),
            model: model_path(model),
        })
    }
}

#[async_trait]
impl GeminiTransport for HttpGeminiTransport {
    async fn generate(&self, request: &GenerateContentRequest) -> Result<String, TransportError> {
        let url = format!("{API_BASE}/{}:generateContent", self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: GeminiResponse = response.json().await?;

        if let Some(error) = body.error {
            return Err(TransportError::Decode(error.message));
        }
        let text: String = body
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

/// `gemini-1.5-pro` → `models/gemini-1.5-pro`.
fn model_path(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Models usable for document OCR: Gemini models that support
/// `generateContent`.
pub async fn list_vision_models(api_key: &str) -> Result<Vec<String>, ConversionError> {
    let client = http_client(30)?;
    let response = client
        .get(format!("{API_BASE}/models"))
        .query(&[("key", api_key), ("pageSize", "1000")])
        .send()
        .await
        .map_err(|e| ConversionError::backend(OcrEngine::Gemini.label(), e.to_string()))?;
    let response = check_status(response)
        .await
        .map_err(|e| ConversionError::backend(OcrEngine::Gemini.label(), e.to_string()))?;
    let body: ListModelsResponse = response
        .json()
        .await
        .map_err(|e| ConversionError::backend(OcrEngine::Gemini.label(), e.to_string()))?;
    Ok(filter_vision_models(body))
}

fn filter_vision_models(body: ListModelsResponse) -> Vec<String> {
    body.models
        .into_iter()
        .filter(|m| m.name.contains("gemini"))
        .filter(|m| {
            m.supported_generation_methods
                .iter()
                .any(|g| g == "generateContent")
        })
        .map(|m| m.name)
        .collect()
}

// ── Sentinel parsing ─────────────────────────────────────────────────────────

static RE_SENTINEL_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"==Start of OCR for page (\d+)==").unwrap());

static RE_SENTINEL_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"==End of OCR for page (\d+)==").unwrap());

/// Extract `==Start of OCR for page X==…==End of OCR for page X==` blocks.
///
/// A block runs from its start marker to the first end marker with the same
/// page number, and never past the next start marker. A start without its own
/// end is dropped on its own; the blocks around it survive. Text outside a
/// recognised pair is discarded. Page content is trimmed. The result is
/// sorted by page number; the first block wins for a repeated page.
pub fn parse_sentinel_pages(text: &str) -> Vec<PageResult> {
    let starts: Vec<(usize, usize, usize)> = RE_SENTINEL_START
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let page: usize = caps[1].parse().ok()?;
            Some((page, whole.start(), whole.end()))
        })
        .collect();

    let mut pages: Vec<PageResult> = starts
        .iter()
        .enumerate()
        .filter_map(|(i, &(page, _, body_start))| {
            if page == 0 {
                return None;
            }
            let limit = starts.get(i + 1).map_or(text.len(), |next| next.1);
            let region = &text[body_start..limit];
            let end = RE_SENTINEL_END.captures_iter(region).find_map(|caps| {
                let n: usize = caps[1].parse().ok()?;
                if n == page {
                    caps.get(0).map(|m| m.start())
                } else {
                    None
                }
            });
            match end {
                Some(end) => Some(PageResult::ok(page, region[..end].trim())),
                None => {
                    debug!("Discarding page {page} block without its end marker");
                    None
                }
            }
        })
        .collect();
    pages.sort_by_key(|p| p.page_num);
    pages.dedup_by_key(|p| p.page_num);
    pages
}

// ── Backend ──────────────────────────────────────────────────────────────────

pub struct GeminiBackend {
    transport: Arc<dyn GeminiTransport>,
    temperature: f32,
}

impl GeminiBackend {
    pub fn from_config(config: &ConversionConfig) -> Result<Self, ConversionError> {
        let api_key = config
            .google_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConversionError::MissingCredential {
                engine: OcrEngine::Gemini.to_string(),
                credential: "Google API key",
            })?;
        let transport =
            HttpGeminiTransport::new(api_key, &config.google_model, config.api_timeout_secs)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn GeminiTransport>, config: &ConversionConfig) -> Self {
        Self {
            transport,
            temperature: config.temperature,
        }
    }

    pub fn build_request(&self, pdf: &[u8]) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: "application/pdf".to_string(),
                            data: STANDARD.encode(pdf),
                        },
                    },
                    GeminiPart::Text {
                        text: DOCUMENT_OCR_PROMPT.to_string(),
                    },
                ],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl OcrBackend for GeminiBackend {
    fn engine(&self) -> OcrEngine {
        OcrEngine::Gemini
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
        let request = self.build_request(&pdf);
        info!("Sending {} pages ({} bytes) to Gemini", page_count, pdf.len());

        let text = ctx
            .cancel
            .run(self.transport.generate(&request))
            .await?
            .map_err(|e| ConversionError::backend(OcrEngine::Gemini.label(), e.to_string()))?;

        let pages = parse_sentinel_pages(&text);
        if pages.is_empty() && page_count > 0 {
            warn!("Gemini response contained no page sentinels");
            return Err(ConversionError::backend(
                OcrEngine::Gemini.label(),
                "response contained no recognisable page blocks",
            ));
        }
        debug!("Gemini returned {} of {} pages", pages.len(), page_count);
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CancelToken, JobId};
    use crate::progress::ProgressReporter;

    struct Canned(Result<String, TransportError>);

    #[async_trait]
    impl GeminiTransport for Canned {
        async fn generate(
            &self,
            _request: &GenerateContentRequest,
        ) -> Result<String, TransportError> {
            self.0.clone()
        }
    }

    fn backend(reply: Result<String, TransportError>) -> GeminiBackend {
        let config = ConversionConfig::builder()
            .engine(OcrEngine::Gemini)
            .google_api_key("test-key")
            .build()
            .unwrap();
        GeminiBackend::with_transport(Arc::new(Canned(reply)), &config)
    }

    fn document(page_count: usize) -> RecognitionInput {
        RecognitionInput::Document {
            pdf: b"%PDF-1.4 test".to_vec().into(),
            page_count,
        }
    }

    fn ctx() -> RecognitionContext {
        RecognitionContext::new(ProgressReporter::silent(JobId(1)), CancelToken::none(), 1)
    }

    #[test]
    fn single_sentinel_block() {
        let pages = parse_sentinel_pages("==Start of OCR for page 1==Hello==End of OCR for page 1==");
        assert_eq!(pages, vec![PageResult::ok(1, "Hello")]);
    }

    #[test]
    fn text_outside_sentinels_is_discarded() {
        let text = "Sure! Here is the OCR.\n\
            ==Start of OCR for page 2==\nSecond\n==End of OCR for page 2==\n\
            chatter\n\
            ==Start of OCR for page 1==\n# First\n==End of OCR for page 1==\nBye";
        let pages = parse_sentinel_pages(text);
        assert_eq!(
            pages,
            vec![PageResult::ok(1, "# First"), PageResult::ok(2, "Second")]
        );
    }

    #[test]
    fn mismatched_pair_is_dropped() {
        let text = "==Start of OCR for page 1==A==End of OCR for page 2==";
        assert!(parse_sentinel_pages(text).is_empty());
    }

    #[test]
    fn missing_end_marker_drops_only_that_page() {
        let text = "==Start of OCR for page 1==\nFirst\n\
            ==Start of OCR for page 2==\nSecond\n==End of OCR for page 2==\n\
            ==Start of OCR for page 3==\nThird\n==End of OCR for page 3==";
        assert_eq!(
            parse_sentinel_pages(text),
            vec![PageResult::ok(2, "Second"), PageResult::ok(3, "Third")]
        );
    }

    #[test]
    fn stray_end_marker_inside_a_block_is_skipped() {
        let text = "==Start of OCR for page 1==\nA\n==End of OCR for page 9==\nB\n\
            ==End of OCR for page 1==";
        let pages = parse_sentinel_pages(text);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_num, 1);
        assert!(pages[0].text.starts_with("A\n"));
        assert!(pages[0].text.ends_with("\nB"));
    }

    #[tokio::test]
    async fn one_unterminated_block_does_not_fail_the_job() {
        let reply = "==Start of OCR for page 1==\nFirst\n\
            ==Start of OCR for page 2==\nSecond\n==End of OCR for page 2==";
        let pages = backend(Ok(reply.into()))
            .recognize(document(2), &ctx())
            .await
            .unwrap();
        assert_eq!(pages, vec![PageResult::ok(2, "Second")]);
    }

    #[test]
    fn model_path_is_prefixed_once() {
        assert_eq!(model_path("gemini-1.5-pro"), "models/gemini-1.5-pro");
        assert_eq!(model_path("models/gemini-1.5-pro"), "models/gemini-1.5-pro");
    }

    #[test]
    fn request_inlines_the_pdf() {
        let request = backend(Ok(String::new())).build_request(b"%PDF");
        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "application/pdf");
        assert_eq!(parts[0]["inline_data"]["data"], STANDARD.encode(b"%PDF"));
        assert_eq!(parts[1]["text"], DOCUMENT_OCR_PROMPT);
        assert!(json["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn vision_models_are_filtered() {
        let body: ListModelsResponse = serde_json::from_value(serde_json::json!({
            "models": [
                {"name": "models/gemini-1.5-pro", "supportedGenerationMethods": ["generateContent", "countTokens"]},
                {"name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"]},
                {"name": "models/gemini-embedding", "supportedGenerationMethods": ["embedContent"]}
            ]
        }))
        .unwrap();
        assert_eq!(filter_vision_models(body), vec!["models/gemini-1.5-pro"]);
    }

    #[tokio::test]
    async fn transport_failure_fails_the_job() {
        let err = backend(Err(TransportError::Status {
            status: 403,
            body: "API key not valid".into(),
        }))
        .recognize(document(2), &ctx())
        .await
        .unwrap_err();
        assert!(matches!(err, ConversionError::Backend { .. }));
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn response_without_sentinels_is_an_error() {
        let err = backend(Ok("I cannot read this document.".into()))
            .recognize(document(1), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Backend { .. }));
    }
}
