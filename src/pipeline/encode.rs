//! Image encoding for the two outbound paths.
//!
//! The QA request carries the *original file bytes*, base64-wrapped — the
//! model reads the photo exactly as shot, and the inference path stays
//! independent of whether local pixel decode succeeded. The upload path
//! instead re-encodes decoded pixels as JPEG (see
//! [`crate::pipeline::publish`]), which needs the alpha channel flattened
//! first because JPEG has no transparency.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// MIME type for the QA payload, derived from the file extension.
pub fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// Wrap raw encoded file bytes as base64 [`ImageData`] for the model.
///
/// `detail: "high"` instructs GPT-4-class models to use the full image tile
/// budget; receipts are dense with small print and lose their totals at the
/// single-tile overview setting.
pub fn encode_for_qa(bytes: &[u8], mime: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, mime).with_detail("high")
}

/// Re-encode a decoded image as JPEG bytes for upload.
///
/// The alpha channel is dropped (JPEG cannot carry it); callers bake EXIF
/// orientation into the pixels before calling this.
pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::path::PathBuf;

    #[test]
    fn mime_follows_extension() {
        assert_eq!(mime_for(&PathBuf::from("a.jpg")), "image/jpeg");
        assert_eq!(mime_for(&PathBuf::from("a.JPEG")), "image/jpeg");
        assert_eq!(mime_for(&PathBuf::from("a.png")), "image/png");
        assert_eq!(mime_for(&PathBuf::from("noext")), "image/png");
    }

    #[test]
    fn encode_for_qa_is_valid_base64() {
        let data = encode_for_qa(b"not really an image", "image/png");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, b"not really an image");
    }

    #[test]
    fn encode_jpeg_flattens_alpha() {
        let img =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 128])));
        let bytes = encode_jpeg(&img).expect("encode should succeed despite alpha");
        let reloaded = image::load_from_memory(&bytes).expect("valid JPEG");
        assert_eq!(reloaded.width(), 8);
        assert_eq!(reloaded.height(), 8);
    }
}
