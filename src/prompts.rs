//! Fixed prompts for the vision-model OCR engines.
//!
//! Kept in one place so unit tests can inspect them without a live model.

/// Reply a vision model gives for a page with no text.
///
/// Adapters map it to an empty page.
pub const BLANK_PAGE_SENTINEL: &str = "[BLANK PAGE]";

/// System instruction for per-page transcription by a local vision model.
pub const TRANSCRIPTION_SYSTEM_PROMPT: &str = r#"You are a precise OCR engine. Transcribe the text of the page image exactly as printed.

Rules:
- Output the text verbatim. Do not paraphrase, summarise, translate or correct the wording.
- Keep the reading order a human would use, including multi-column layouts.
- Rejoin words that are hyphenated only because of a line break at the end of a line.
- Leave out running headers, running footers and page numbers.
- Reproduce every diacritic and special character exactly (ä, ö, ü, ß, é, ł and so on).
- Keep paragraph breaks as blank lines.
- Output only the transcribed text, with no commentary and no code fences.
- If the page contains no text at all, output exactly: [BLANK PAGE]"#;

/// User message sent together with each page image.
pub const TRANSCRIPTION_USER_PROMPT: &str = "Transcribe this page.";

/// Instruction sent with a whole PDF to a cloud document model.
///
/// The reply must wrap every page in the sentinel pair parsed by
/// [`crate::ocr::gemini::parse_sentinel_pages`].
pub const DOCUMENT_OCR_PROMPT: &str = r#"Perform OCR on every page of the attached PDF and return the text of each page as Markdown.

For each page, output exactly:
==Start of OCR for page X==
<the page content as Markdown>
==End of OCR for page X==

where X is the 1-based page number. Process the pages in order, include every page even when it is empty, and write nothing outside these markers."#;
