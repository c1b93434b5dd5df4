//! Image encoding: `DynamicImage` → PNG bytes, optionally base64-wrapped.
//!
//! PNG keeps text edges crisp; JPEG artefacts on rendered glyphs hurt every
//! recognition engine. Local engines get the PNG written to a scratch file,
//! vision endpoints get it as a base64 data URI.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a rasterised page as base64 PNG for a JSON request body.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let b64 = STANDARD.encode(encode_png(img)?);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

/// `data:` URI for an OpenAI-style `image_url` content part.
pub fn png_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    Ok(format!("data:image/png;base64,{}", encode_png_base64(img)?))
}
