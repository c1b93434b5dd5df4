//! Local vision-language model behind an OpenAI-compatible endpoint.
//!
//! Pages go one at a time, each as its own chat-completion request carrying
//! the fixed transcription prompt and the page PNG as a data URI. A page that
//! still fails after `max_retries` retries becomes an empty page; the job
//! carries on.
//!
//! ## Retry Strategy
//!
//! Local servers stall while loading a model or under memory pressure.
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`) gives them room:
//! with 500 ms base and 2 retries the waits are 500 ms → 1 s.

use crate::config::{ConversionConfig, OcrEngine};
use crate::error::{ConversionError, PageError};
use crate::ocr::{
    check_status, http_client, Granularity, OcrBackend, RecognitionContext, RecognitionInput,
    TransportError,
};
use crate::output::{PageImage, PageResult};
use crate::pipeline::encode::png_data_uri;
use crate::pipeline::postprocess::clean_page_text;
use crate::prompts::{BLANK_PAGE_SENTINEL, TRANSCRIPTION_SYSTEM_PROMPT, TRANSCRIPTION_USER_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

// ── Transport ────────────────────────────────────────────────────────────────

/// Sends one chat-completion request and returns the assistant text.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, TransportError>;
}

/// `reqwest` transport against a real endpoint.
pub struct HttpChatCompletion {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChatCompletion {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, ConversionError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ChatCompletion for HttpChatCompletion {
    async fn complete(&self, request: &ChatRequest) -> Result<String, TransportError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let response = check_status(response).await?;
        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransportError::Decode("response has no message content".into()))
    }
}

// ── Backend ──────────────────────────────────────────────────────────────────

pub struct LmStudioBackend {
    transport: Arc<dyn ChatCompletion>,
    model: Option<String>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl LmStudioBackend {
    pub fn from_config(config: &ConversionConfig) -> Result<Self, ConversionError> {
        let transport =
            HttpChatCompletion::new(config.lmstudio_endpoint.trim(), config.api_timeout_secs)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn ChatCompletion>, config: &ConversionConfig) -> Self {
        Self {
            transport,
            model: config.lmstudio_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    /// Request for one page: system prompt, then the page image.
    pub fn build_request(&self, image_uri: String) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(TRANSCRIPTION_SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: TRANSCRIPTION_USER_PROMPT.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: image_uri },
                        },
                    ]),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }

    /// Transcribe one page. `Err` only on cancellation.
    async fn process_page(
        &self,
        page: &PageImage,
        ctx: &RecognitionContext,
    ) -> Result<PageResult, ConversionError> {
        let page_num = page.page_num;
        let uri = match png_data_uri(&page.image) {
            Ok(uri) => uri,
            Err(e) => {
                return Ok(PageResult::failed(
                    page_num,
                    PageError::RecognitionFailed {
                        page: page_num,
                        detail: format!("PNG encoding failed: {e}"),
                    },
                ))
            }
        };
        let request = self.build_request(uri);

        let mut last_err: Option<TransportError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page_num, attempt, self.max_retries, backoff
                );
                ctx.cancel
                    .run(tokio::time::sleep(Duration::from_millis(backoff)))
                    .await?;
            }

            match ctx.cancel.run(self.transport.complete(&request)).await? {
                Ok(raw) => {
                    debug!("Page {}: {} chars from vision model", page_num, raw.len());
                    let text = clean_page_text(&raw);
                    let text = if text == BLANK_PAGE_SENTINEL {
                        String::new()
                    } else {
                        text
                    };
                    return Ok(PageResult::ok(page_num, text));
                }
                Err(e) => {
                    warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        let error = match last_err {
            Some(TransportError::Timeout) => PageError::Timeout {
                page: page_num,
                secs: self.timeout_secs,
            },
            other => PageError::TransportFailed {
                page: page_num,
                retries: self.max_retries,
                detail: other.map_or_else(|| "Unknown error".to_string(), |e| e.to_string()),
            },
        };
        Ok(PageResult::failed(page_num, error))
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, saturating.
pub fn retry_backoff(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}

#[async_trait]
impl OcrBackend for LmStudioBackend {
    fn engine(&self) -> OcrEngine {
        OcrEngine::LmStudio
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
        let mut results = Vec::with_capacity(pages.len());
        for page in &pages {
            ctx.cancel.check()?;
            results.push(self.process_page(page, ctx).await?);
            ctx.page_finished();
        }
        Ok(results)
    }
}
