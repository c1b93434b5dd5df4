//! pdfium library binding and document loading.
//!
//! Set `PDFIUM_LIB_PATH` to a library file or to the directory holding it;
//! otherwise the system library is used. Both the text-layer reader and the
//! renderer bind on their blocking thread and drop the binding when done.

use crate::error::ConversionError;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Environment variable naming an explicit pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium, honouring `PDFIUM_LIB_PATH`.
pub fn bind_pdfium() -> Result<Pdfium, ConversionError> {
    let bindings = match std::env::var_os(PDFIUM_LIB_PATH_ENV) {
        Some(raw) if !raw.is_empty() => {
            let path = Path::new(&raw);
            let lib = if path.is_dir() {
                path.join(platform_library_name())
            } else {
                path.to_path_buf()
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib).map_err(|e| {
                ConversionError::PdfiumBindingFailed(format!("{}: {e}", lib.display()))
            })?
        }
        _ => Pdfium::bind_to_system_library()
            .map_err(|e| ConversionError::PdfiumBindingFailed(e.to_string()))?,
    };
    Ok(Pdfium::new(bindings))
}

/// `libpdfium.so`, `libpdfium.dylib` or `pdfium.dll`.
fn platform_library_name() -> String {
    format!(
        "{}pdfium{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    )
}

/// Open a PDF from memory, mapping pdfium's errors to ours.
pub fn open_document<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ConversionError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| classify_load_error(&format!("{e:?}"), password.is_some()))
}

fn classify_load_error(detail: &str, password_given: bool) -> ConversionError {
    if detail.contains("Password") || detail.contains("password") {
        if password_given {
            ConversionError::WrongPassword
        } else {
            ConversionError::PasswordRequired
        }
    } else {
        ConversionError::CorruptPdf {
            detail: detail.to_string(),
        }
    }
}
