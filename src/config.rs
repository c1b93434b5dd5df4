//! Configuration types for a PDF conversion request.
//!
//! Every knob a conversion needs travels in one [`ConversionConfig`], built
//! via [`ConversionConfigBuilder`]. The request surface hands the config to
//! the service together with the PDF buffer; the orchestrator never reads
//! settings from anywhere else.

use crate::error::ConversionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default OpenAI-compatible chat endpoint exposed by LM Studio.
pub const DEFAULT_LMSTUDIO_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";

/// Default Gemini model for whole-document OCR.
pub const DEFAULT_GOOGLE_MODEL: &str = "models/gemini-1.5-pro";

/// Default Mistral OCR model.
pub const DEFAULT_MISTRAL_MODEL: &str = "mistral-ocr-latest";

/// Upper bound on per-page retries for network engines.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for one conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use scannio::{ConversionConfig, OcrEngine};
///
/// let config = ConversionConfig::builder()
///     .engine(OcrEngine::Tesseract)
///     .languages(["eng", "deu"])
///     .max_workers(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.language_spec(), "eng+deu");
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Language codes for the local engine, e.g. `["eng", "deu"]`. Default: `["eng"]`.
    pub languages: Vec<String>,

    /// Output serializer selected by the caller. Default: plain text.
    pub output_format: OutputFormat,

    /// OCR engine used when the PDF has no usable text layer. Default: Tesseract.
    pub engine: OcrEngine,

    /// Chat-completions URL of the local vision model server.
    pub lmstudio_endpoint: String,

    /// Model name sent to the local vision model server.
    pub lmstudio_model: Option<String>,

    /// Google Generative Language API key.
    pub google_api_key: Option<String>,

    /// Gemini model, e.g. `models/gemini-1.5-pro`.
    pub google_model: String,

    /// Mistral API key.
    pub mistral_api_key: Option<String>,

    /// Mistral OCR model.
    pub mistral_model: String,

    /// Program plus leading arguments for the external PaddleOCR runner.
    /// The page image path is appended as the last argument.
    pub paddle_command: Vec<String>,

    /// Tesseract executable. Default: `tesseract` on `PATH`.
    pub tesseract_binary: PathBuf,

    /// Upscaling factor applied when rasterising pages. Default: 3.0.
    ///
    /// Tuned for recognition legibility rather than display. Range: 0.5–8.0.
    pub render_scale: f32,

    /// Upper bound on local recognition engines running at once. Default: 4.
    ///
    /// The real pool size is `min(available parallelism, max_workers, pages)`.
    pub max_workers: usize,

    /// Skip the text-layer attempt and go straight to OCR. Default: false.
    pub force_ocr: bool,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Retries per page for the local vision endpoint. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout for network backends, in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Sampling temperature for vision models. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens a vision model may generate per page. Default: 4096.
    pub max_tokens: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            languages: vec!["eng".to_string()],
            output_format: OutputFormat::default(),
            engine: OcrEngine::default(),
            lmstudio_endpoint: DEFAULT_LMSTUDIO_ENDPOINT.to_string(),
            lmstudio_model: None,
            google_api_key: None,
            google_model: DEFAULT_GOOGLE_MODEL.to_string(),
            mistral_api_key: None,
            mistral_model: DEFAULT_MISTRAL_MODEL.to_string(),
            paddle_command: vec!["python3".to_string(), "run_paddleocr.py".to_string()],
            tesseract_binary: PathBuf::from("tesseract"),
            render_scale: 3.0,
            max_workers: 4,
            force_ocr: false,
            password: None,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

fn redact(key: &Option<String>) -> Option<&'static str> {
    key.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("languages", &self.languages)
            .field("output_format", &self.output_format)
            .field("engine", &self.engine)
            .field("lmstudio_endpoint", &self.lmstudio_endpoint)
            .field("lmstudio_model", &self.lmstudio_model)
            .field("google_api_key", &redact(&self.google_api_key))
            .field("google_model", &self.google_model)
            .field("mistral_api_key", &redact(&self.mistral_api_key))
            .field("mistral_model", &self.mistral_model)
            .field("paddle_command", &self.paddle_command)
            .field("render_scale", &self.render_scale)
            .field("max_workers", &self.max_workers)
            .field("force_ocr", &self.force_ocr)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Languages joined the way Tesseract expects them: `eng+deu`.
    pub fn language_spec(&self) -> String {
        self.languages
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Reject configurations that cannot run before any work starts.
    ///
    /// Only the settings of the selected engine are checked; credentials for
    /// other engines may be absent.
    pub fn validate(&self) -> Result<(), ConversionError> {
        if !(0.5..=8.0).contains(&self.render_scale) {
            return Err(ConversionError::InvalidConfig(format!(
                "render scale must be 0.5–8.0, got {}",
                self.render_scale
            )));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ConversionError::InvalidConfig(format!(
                "max retries must be ≤ {MAX_RETRIES}, got {}",
                self.max_retries
            )));
        }
        if self.max_workers == 0 {
            return Err(ConversionError::InvalidConfig(
                "max workers must be ≥ 1".into(),
            ));
        }

        match self.engine {
            OcrEngine::Tesseract => {
                if self.languages.iter().all(|l| l.trim().is_empty()) {
                    return Err(ConversionError::InvalidConfig(
                        "Please select at least one language or enter a custom language code."
                            .into(),
                    ));
                }
            }
            OcrEngine::LmStudio => {
                let endpoint = self.lmstudio_endpoint.trim();
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(ConversionError::InvalidConfig(format!(
                        "LM Studio endpoint must be an http(s) URL, got '{endpoint}'"
                    )));
                }
            }
            OcrEngine::Gemini => {
                if is_blank(&self.google_api_key) {
                    return Err(ConversionError::MissingCredential {
                        engine: OcrEngine::Gemini.to_string(),
                        credential: "Google API key",
                    });
                }
            }
            OcrEngine::Mistral => {
                if is_blank(&self.mistral_api_key) {
                    return Err(ConversionError::MissingCredential {
                        engine: OcrEngine::Mistral.to_string(),
                        credential: "Mistral API key",
                    });
                }
            }
            OcrEngine::Paddle => {
                if self.paddle_command.first().map_or(true, |p| p.trim().is_empty()) {
                    return Err(ConversionError::InvalidConfig(
                        "PaddleOCR command must not be empty".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    /// Language codes, trimmed, blanks and duplicates dropped. Entries may
    /// themselves be `+`-separated.
    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.languages = parse_languages("", languages);
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn engine(mut self, engine: OcrEngine) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn lmstudio_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.lmstudio_endpoint = url.into();
        self
    }

    pub fn lmstudio_model(mut self, model: impl Into<String>) -> Self {
        self.config.lmstudio_model = Some(model.into());
        self
    }

    pub fn google_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.google_api_key = Some(key.into());
        self
    }

    pub fn google_model(mut self, model: impl Into<String>) -> Self {
        self.config.google_model = model.into();
        self
    }

    pub fn mistral_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.mistral_api_key = Some(key.into());
        self
    }

    pub fn mistral_model(mut self, model: impl Into<String>) -> Self {
        self.config.mistral_model = model.into();
        self
    }

    pub fn paddle_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.paddle_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn tesseract_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_binary = path.into();
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 8.0);
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n.max(1);
        self
    }

    pub fn force_ocr(mut self, v: bool) -> Self {
        self.config.force_ocr = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    /// Build the configuration, validating the selected engine's settings.
    pub fn build(self) -> Result<ConversionConfig, ConversionError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// OCR engine tag. Selected once per job; see [`crate::ocr::BackendRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngine {
    /// Local Tesseract engines in a bounded worker pool.
    #[default]
    Tesseract,
    /// Local vision-language model behind an OpenAI-compatible endpoint.
    LmStudio,
    /// Google Gemini, whole document in one request.
    #[serde(rename = "google", alias = "gemini")]
    Gemini,
    /// Mistral OCR via upload / signed URL / process / delete.
    Mistral,
    /// External PaddleOCR process, one invocation per page.
    Paddle,
}

impl OcrEngine {
    /// All engines, in the order the CLI lists them.
    pub const ALL: [OcrEngine; 5] = [
        OcrEngine::Tesseract,
        OcrEngine::LmStudio,
        OcrEngine::Gemini,
        OcrEngine::Mistral,
        OcrEngine::Paddle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrEngine::Tesseract => "tesseract",
            OcrEngine::LmStudio => "lmstudio",
            OcrEngine::Gemini => "google",
            OcrEngine::Mistral => "mistral",
            OcrEngine::Paddle => "paddle",
        }
    }

    /// Human-readable name used in progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            OcrEngine::Tesseract => "Tesseract",
            OcrEngine::LmStudio => "LM Studio",
            OcrEngine::Gemini => "Google Gemini",
            OcrEngine::Mistral => "Mistral OCR",
            OcrEngine::Paddle => "PaddleOCR",
        }
    }
}

impl fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrEngine {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tesseract" => Ok(OcrEngine::Tesseract),
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(OcrEngine::LmStudio),
            "google" | "gemini" => Ok(OcrEngine::Gemini),
            "mistral" => Ok(OcrEngine::Mistral),
            "paddle" | "paddleocr" => Ok(OcrEngine::Paddle),
            other => Err(ConversionError::UnknownEngine(other.to_string())),
        }
    }
}

/// Output serializer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain UTF-8 text with page markers. (default)
    #[default]
    Text,
    /// EPUB 3 book, one chapter per page.
    Epub,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Epub => "epub",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "ebook" | "epub" => Ok(OutputFormat::Epub),
            other => Err(ConversionError::InvalidConfig(format!(
                "unknown output format '{other}' (expected text or epub)"
            ))),
        }
    }
}

/// Merge a `+`-separated language spec with extra codes.
///
/// Order is preserved and duplicates are dropped:
/// `parse_languages("eng+deu", ["deu", "fra"])` → `["eng", "deu", "fra"]`.
pub fn parse_languages<I, S>(spec: &str, extra: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    let extra: Vec<String> = extra
        .into_iter()
        .flat_map(|s| {
            s.as_ref()
                .split('+')
                .map(|p| p.trim().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    for code in spec.split('+').map(str::trim).map(str::to_string).chain(extra) {
        if !code.is_empty() && !out.contains(&code) {
            out.push(code);
        }
    }
    out
}
