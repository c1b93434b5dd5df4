//! Input loading: read a local PDF into memory and validate it.
//!
//! Jobs carry the document as an in-memory buffer, so the request surface can
//! hand over bytes from anywhere. The magic-byte check runs before anything
//! reaches pdfium so callers get a meaningful error rather than a parse crash.

use crate::error::ConversionError;
use crate::job::PdfBytes;
use std::path::Path;
use tracing::debug;

/// Read `path` and return its bytes, rejecting non-PDF files.
pub async fn load_pdf(path: &Path) -> Result<PdfBytes, ConversionError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConversionError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConversionError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(ConversionError::Internal(format!(
                "Failed to read '{}': {e}",
                path.display()
            )));
        }
    };

    check_pdf_magic(&bytes)?;
    debug!("Loaded PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes.into())
}

/// Verify that `bytes` starts with `%PDF`.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), ConversionError> {
    if bytes.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(ConversionError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        })
    }
}
