//! CLI binary for scannio.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, runs one job on a `ConversionService` and writes the
//! result.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scannio::config::{DEFAULT_GOOGLE_MODEL, DEFAULT_LMSTUDIO_ENDPOINT, DEFAULT_MISTRAL_MODEL};
use scannio::ocr::gemini::list_vision_models;
use scannio::pipeline::input::load_pdf;
use scannio::service::MSG_STARTING;
use scannio::{
    parse_languages, ConversionConfig, ConversionError, ConversionService, ConversionStats,
    ExtractionSource, JobId, OcrEngine, Orchestrator, OutputFormat,
};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Exit status after Ctrl-C, as shells report SIGINT.
const EXIT_CANCELLED: i32 = 130;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text layer if present, otherwise Tesseract (English); file on the Desktop
  scannio scan.pdf

  # German + English OCR into an EPUB
  scannio --lang deu+eng --format epub scan.pdf -o scan.epub

  # Local vision model through LM Studio
  scannio --engine lmstudio --lmstudio-model qwen2-vl-7b scan.pdf -o scan.txt

  # Whole document through Google Gemini, printed to stdout
  GOOGLE_API_KEY=... scannio --engine google --stdout scan.pdf

  # Mistral OCR, ignoring any embedded text
  MISTRAL_API_KEY=... scannio --engine mistral --force-ocr scan.pdf

  # Which Gemini models can read documents?
  GOOGLE_API_KEY=... scannio --list-google-models

ENGINES:
  Tag        Engine          Input       Needs
  ─────────  ──────────────  ──────────  ─────────────────────────────────
  tesseract  Tesseract       pages       tesseract + tesseract-ocr-<lang>
  lmstudio   LM Studio       pages       a loaded vision model
  google     Google Gemini   document    GOOGLE_API_KEY
  mistral    Mistral OCR     document    MISTRAL_API_KEY
  paddle     PaddleOCR       pages       a script printing PaddleOCR JSON

ENVIRONMENT VARIABLES:
  GOOGLE_API_KEY          Google Gemini API key
  MISTRAL_API_KEY         Mistral API key
  SCANNIO_ENGINE          Default engine tag
  SCANNIO_LANG            Default language spec (e.g. eng+deu)
  PDFIUM_LIB_PATH         Directory or file of the pdfium library to bind
  RUST_LOG                Override log filtering (e.g. scannio=debug)

Press Ctrl-C to cancel a running conversion.
"#;

/// Turn PDFs into text or EPUB, with OCR when there is no text layer.
#[derive(Parser, Debug)]
#[command(
    name = "scannio",
    version,
    about = "Turn PDFs into text or EPUB, with OCR when there is no text layer",
    long_about = "Extract the text of a PDF. When every page carries an embedded text layer \
it is used directly; otherwise the whole document goes through the selected OCR engine: \
a local Tesseract pool, a vision model behind LM Studio, Google Gemini, Mistral OCR or a \
PaddleOCR command.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to convert.
    #[arg(required_unless_present = "list_google_models")]
    input: Option<PathBuf>,

    /// Output file. Default: Desktop/converted_<timestamp>.<ext>.
    #[arg(short, long, env = "SCANNIO_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format: text or epub.
    #[arg(short, long, env = "SCANNIO_FORMAT", default_value = "text")]
    format: OutputFormat,

    /// OCR engine: tesseract, lmstudio, google, mistral, paddle.
    #[arg(short, long, env = "SCANNIO_ENGINE", default_value = "tesseract")]
    engine: OcrEngine,

    /// OCR languages, `+`-separated (Tesseract codes).
    #[arg(short, long, env = "SCANNIO_LANG", default_value = "eng")]
    lang: String,

    /// Extra language codes merged into --lang.
    #[arg(long, env = "SCANNIO_CUSTOM_LANG")]
    custom_lang: Option<String>,

    /// LM Studio chat-completions endpoint.
    #[arg(long, env = "SCANNIO_LMSTUDIO_ENDPOINT", default_value = DEFAULT_LMSTUDIO_ENDPOINT)]
    lmstudio_endpoint: String,

    /// Model id loaded in LM Studio (optional).
    #[arg(long, env = "SCANNIO_LMSTUDIO_MODEL")]
    lmstudio_model: Option<String>,

    /// Google API key for the Gemini engine.
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,

    /// Gemini model.
    #[arg(long, env = "SCANNIO_GOOGLE_MODEL", default_value = DEFAULT_GOOGLE_MODEL)]
    google_model: String,

    /// Mistral API key for the Mistral OCR engine.
    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    mistral_api_key: Option<String>,

    /// Mistral OCR model.
    #[arg(long, env = "SCANNIO_MISTRAL_MODEL", default_value = DEFAULT_MISTRAL_MODEL)]
    mistral_model: String,

    /// PaddleOCR command; the page image path is appended.
    #[arg(long, env = "SCANNIO_PADDLE_COMMAND", default_value = "python3 run_paddleocr.py")]
    paddle_command: String,

    /// Tesseract executable.
    #[arg(long, env = "SCANNIO_TESSERACT", default_value = "tesseract")]
    tesseract_binary: PathBuf,

    /// Rendering scale for OCR (0.5–8.0).
    #[arg(long, env = "SCANNIO_SCALE", default_value_t = 3.0)]
    scale: f32,

    /// Maximum Tesseract pool size.
    #[arg(short = 'j', long, env = "SCANNIO_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Skip the text layer and always run OCR.
    #[arg(long, env = "SCANNIO_FORCE_OCR")]
    force_ocr: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SCANNIO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Retries per page for LM Studio requests.
    #[arg(long, env = "SCANNIO_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP timeout per request, in seconds.
    #[arg(long, env = "SCANNIO_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print the text to stdout instead of writing a file.
    #[arg(long, conflicts_with = "output")]
    stdout: bool,

    /// Print the full result (pages, errors, stats) as JSON to stdout.
    #[arg(long, conflicts_with_all = ["output", "stdout"])]
    json: bool,

    /// List Gemini models that can read documents, then exit.
    #[arg(long)]
    list_google_models: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "SCANNIO_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCANNIO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCANNIO_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner shows every status line; library logs would tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Model discovery ──────────────────────────────────────────────────
    if cli.list_google_models {
        let key = cli
            .google_api_key
            .as_deref()
            .context("--list-google-models needs GOOGLE_API_KEY or --google-api-key")?;
        let models = list_vision_models(key)
            .await
            .context("Failed to list Google models")?;
        for model in models {
            println!("{model}");
        }
        return Ok(());
    }

    let input = cli.input.clone().context("No input PDF given")?;
    let config = build_config(&cli)?;
    let pdf = load_pdf(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    // ── Run conversion ───────────────────────────────────────────────────
    let service = ConversionService::spawn(Arc::new(Orchestrator::pdfium()));
    let spinner = show_progress.then(new_spinner);
    let quiet = cli.quiet;
    let status = |text: &str| match &spinner {
        Some(bar) => bar.set_message(text.to_string()),
        None if !quiet => eprintln!("{} {}", cyan("◆"), text),
        None => {}
    };

    status(MSG_STARTING);
    let handle = service
        .submit(pdf, config.clone())
        .context("Failed to start conversion")?;
    let id = handle.id();

    if cli.stdout || cli.json {
        let outcome = until_ctrl_c(
            &service,
            id,
            handle.wait_with_progress(|event| status(&event.text)),
        )
        .await;
        finish_spinner(&spinner);
        let output = match outcome {
            Err(e) if e.is_cancellation() => exit_cancelled(),
            other => other.context("Conversion failed")?,
        };

        let stdout = io::stdout();
        let mut out = stdout.lock();
        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            writeln!(out, "{json}").context("Failed to write to stdout")?;
        } else {
            out.write_all(output.text.as_bytes())
                .context("Failed to write to stdout")?;
            if !output.text.ends_with('\n') {
                out.write_all(b"\n").ok();
            }
        }
        if !cli.quiet && !cli.json {
            print_summary(&output.source, &output.stats, None);
        }
    } else {
        let outcome = until_ctrl_c(
            &service,
            id,
            handle.save(config.output_format, cli.output.clone(), status),
        )
        .await;
        finish_spinner(&spinner);
        let saved = match outcome {
            Err(e) if e.is_cancellation() => exit_cancelled(),
            other => other.context("Conversion failed")?,
        };
        if !cli.quiet {
            print_summary(&saved.source, &saved.stats, Some(saved.path.as_path()));
        }
    }

    Ok(())
}

/// Drive `fut`; on Ctrl-C cancel job `id` and wait for it to wind down.
async fn until_ctrl_c<F, T>(service: &ConversionService, id: JobId, fut: F) -> F::Output
where
    F: Future<Output = Result<T, ConversionError>>,
{
    tokio::pin!(fut);
    tokio::select! {
        out = &mut fut => out,
        _ = tokio::signal::ctrl_c() => {
            service.cancel(id);
            fut.await
        }
    }
}

fn exit_cancelled() -> ! {
    eprintln!("{} Conversion cancelled", red("✘"));
    std::process::exit(EXIT_CANCELLED);
}

fn new_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
    bar.set_style(style);
    bar.set_prefix("scannio");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn finish_spinner(spinner: &Option<ProgressBar>) {
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }
}

fn print_summary(source: &ExtractionSource, stats: &ConversionStats, path: Option<&Path>) {
    let via = match source {
        ExtractionSource::TextLayer => "text layer".to_string(),
        ExtractionSource::Ocr(engine) => engine.label().to_string(),
    };
    let ok = stats.total_pages.saturating_sub(stats.failed_pages);
    let mark = if stats.failed_pages == 0 {
        green("✔")
    } else {
        cyan("⚠")
    };
    let target = path
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{mark}  {ok}/{} pages via {via}  {}{target}",
        stats.total_pages,
        dim(&format!("{}ms", stats.total_duration_ms)),
    );
    if stats.failed_pages > 0 {
        eprintln!("   {} pages came back empty", red(&stats.failed_pages.to_string()));
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let languages = parse_languages(&cli.lang, cli.custom_lang.as_deref());

    let mut builder = ConversionConfig::builder()
        .languages(languages)
        .output_format(cli.format)
        .engine(cli.engine)
        .lmstudio_endpoint(cli.lmstudio_endpoint.clone())
        .google_model(cli.google_model.clone())
        .mistral_model(cli.mistral_model.clone())
        .paddle_command(cli.paddle_command.split_whitespace())
        .tesseract_binary(cli.tesseract_binary.clone())
        .render_scale(cli.scale)
        .max_workers(cli.workers)
        .force_ocr(cli.force_ocr)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.lmstudio_model {
        builder = builder.lmstudio_model(model.clone());
    }
    if let Some(ref key) = cli.google_api_key {
        builder = builder.google_api_key(key.clone());
    }
    if let Some(ref key) = cli.mistral_api_key {
        builder = builder.mistral_api_key(key.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }

    builder.build().context("Invalid configuration")
}
