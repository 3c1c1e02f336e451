//! Image encoding: raw page bytes → base64 `ImageData` for the VLM request.
//!
//! Pages arrive as already-encoded PNG (rendered by pdfium) or as whatever
//! image the caller supplied (usually PNG or JPEG). They are not re-encoded:
//! the MIME type is sniffed from the magic bytes and the bytes are wrapped
//! as-is. `detail: "high"` asks GPT-4-class models for the full tile budget
//! so fine print survives.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use tracing::debug;

/// Wrap raw image bytes as a base64 payload with the right MIME type.
///
/// Returns `None` when the bytes are not a recognised image.
pub fn encode_image(bytes: &[u8]) -> Option<ImageData> {
    let mime = sniff_mime(bytes)?;
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} image → {} bytes base64", mime, b64.len());
    Some(ImageData::new(b64, mime).with_detail("high"))
}

/// MIME type of an image, from its magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}
