//! Image publisher: push a receipt to a short-lived remote host.
//!
//! The upload is strictly best-effort. Whatever goes wrong — decode, encode,
//! transport, a non-success status, a response body we don't recognise — the
//! failure is logged and the caller gets `None`; the record is still
//! produced, just without a remote URL.
//!
//! The image is re-encoded as JPEG with the EXIF orientation baked into the
//! pixels first: the host strips metadata, and without the bake phone
//! photos arrive sideways. The host's JSON response carries a landing-page
//! URL; a `/dl` path segment is inserted so the stored link serves the raw
//! bytes instead of HTML.

use crate::config::BatchConfig;
use crate::pipeline::encode;
use crate::pipeline::qa::RetryPolicy;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::io::Cursor;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Error)]
enum UploadError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("unexpected response body: {0}")]
    Body(String),
}

/// Upload one image; returns the direct download URL, or `None` on failure.
///
/// Shares the run's retry policy with the inference calls; the per-request
/// deadline comes from the `client`'s configured timeout.
pub async fn publish(
    client: &reqwest::Client,
    config: &BatchConfig,
    file_bytes: &[u8],
    filename: &str,
    policy: &RetryPolicy,
) -> Option<String> {
    let img = match decode_oriented(file_bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("{filename}: skipping upload, decode failed: {e}");
            return None;
        }
    };
    let jpeg = match encode::encode_jpeg(&img) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("{filename}: skipping upload, JPEG encode failed: {e}");
            return None;
        }
    };

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "{filename}: upload retry {}/{} after {:?}",
                attempt, policy.max_retries, backoff
            );
            sleep(backoff).await;
        }

        match try_upload(client, config, jpeg.clone(), filename).await {
            Ok(url) => {
                debug!("{filename}: uploaded → {url}");
                return Some(url);
            }
            Err(e) => warn!("{filename}: upload attempt {} failed — {e}", attempt + 1),
        }
    }

    warn!("{filename}: giving up on upload, record will have no URL");
    None
}

/// One multipart POST: `file` part plus the expiry field.
async fn try_upload(
    client: &reqwest::Client,
    config: &BatchConfig,
    jpeg: Vec<u8>,
    filename: &str,
) -> Result<String, UploadError> {
    let part = reqwest::multipart::Part::bytes(jpeg)
        .file_name(filename.to_string())
        .mime_str("image/jpeg")
        .map_err(|e| UploadError::Transport(e.to_string()))?;
    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("expires", config.upload_expiry.clone());

    let response = client
        .post(&config.upload_endpoint)
        .multipart(form)
        .send()
        .await
        .map_err(|e| UploadError::Transport(e.to_string()))?;

    if !response.status().is_success() {
        return Err(UploadError::Status(response.status()));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| UploadError::Body(e.to_string()))?;

    let url = body
        .pointer("/data/url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| UploadError::Body(body.to_string()))?;

    Ok(direct_url(url))
}

/// Rewrite the host's landing-page URL into a raw-bytes download URL by
/// inserting a `/dl` segment after the host.
fn direct_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            let path = parsed.path().to_string();
            if path.starts_with("/dl/") {
                return url.to_string();
            }
            parsed.set_path(&format!("/dl{path}"));
            parsed.to_string()
        }
        // Not parseable — store what the host gave us rather than nothing.
        Err(_) => url.to_string(),
    }
}

/// Decode image bytes and bake any EXIF orientation into the pixels.
fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn direct_url_inserts_dl_segment() {
        assert_eq!(
            direct_url("https://files.example.com/18223041/receipt.jpg"),
            "https://files.example.com/dl/18223041/receipt.jpg"
        );
    }

    #[test]
    fn direct_url_is_idempotent() {
        let already = "https://files.example.com/dl/18223041/receipt.jpg";
        assert_eq!(direct_url(already), already);
    }

    #[test]
    fn direct_url_passes_garbage_through() {
        assert_eq!(direct_url("not a url"), "not a url");
    }

    #[test]
    fn decode_oriented_handles_plain_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            5,
            3,
            Rgba([1, 2, 3, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        // PNGs carry no EXIF; orientation must default to no-op.
        let decoded = decode_oriented(&buf).unwrap();
        assert_eq!(decoded.width(), 5);
        assert_eq!(decoded.height(), 3);
    }

    #[test]
    fn decode_oriented_rejects_non_images() {
        assert!(decode_oriented(b"definitely not an image").is_err());
    }

    // NOTE: try_upload needs a live endpoint and is covered by opt-in
    // integration runs, not unit tests.
}
