//! Pipeline stages that turn PDF bytes into page images or page text.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ textlayer ──(complete)──────────────────────────▶ pages
//!              └─(missing)─▶ render ──▶ encode ──▶ OCR ──▶ postprocess
//! (bytes)     (pdfium)      (pdfium)   (PNG/b64)  (ocr::*)  (cleanup)
//! ```
//!
//! 1. [`input`]: load a local file and check the `%PDF` magic bytes
//! 2. [`textlayer`]: read the embedded text of every page; a single empty
//!    page means the whole document goes to OCR
//! 3. [`render`]: rasterise pages in `spawn_blocking`, since pdfium is
//!    not async-safe
//! 4. [`encode`]: PNG-encode page images for files and request bodies
//! 5. [`postprocess`]: deterministic cleanup of model-generated text
//!
//! [`pdfium`] holds the library binding and document loading shared by
//! stages 2 and 3.

pub mod encode;
pub mod input;
pub mod pdfium;
pub mod postprocess;
pub mod render;
pub mod textlayer;
