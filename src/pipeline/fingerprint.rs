//! Content fingerprinting: decoded pixels → SHA-256 hex digest.
//!
//! The digest runs over pixel data, not file bytes, so a re-saved or
//! re-encoded copy of the same photo fingerprints identically while any
//! pixel-level edit changes the digest. Collision resistance here only needs
//! to serve deduplication, not security, but SHA-256 is cheap enough that
//! there is no reason to use anything weaker.
//!
//! Callers that fail to decode an image simply have no fingerprint for it —
//! the image then participates in deduplication by path only.

use image::DynamicImage;
use sha2::{Digest, Sha256};

/// Compute the content fingerprint of a decoded image.
///
/// The image is normalised to RGBA8 first so the digest does not depend on
/// the source file's colour type, and the dimensions are folded in ahead of
/// the pixel bytes.
pub fn fingerprint(img: &DynamicImage) -> String {
    let rgba = img.to_rgba8();
    let mut hasher = Sha256::new();
    hasher.update(rgba.width().to_le_bytes());
    hasher.update(rgba.height().to_le_bytes());
    hasher.update(rgba.as_raw());
    to_hex(&hasher.finalize().into())
}

/// Encode a raw 32-byte digest as a lowercase hex string (64 chars).
fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(px)))
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let fp = fingerprint(&solid(4, 4, [10, 20, 30, 255]));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(&solid(4, 4, [10, 20, 30, 255]));
        let b = fingerprint(&solid(4, 4, [10, 20, 30, 255]));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_survives_lossless_reencode() {
        let img = solid(6, 3, [200, 100, 50, 255]);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        let reloaded = image::load_from_memory(&buf).unwrap();
        assert_eq!(fingerprint(&img), fingerprint(&reloaded));
    }

    #[test]
    fn fingerprint_changes_on_pixel_edit() {
        let a = fingerprint(&solid(4, 4, [10, 20, 30, 255]));
        let b = fingerprint(&solid(4, 4, [10, 20, 31, 255]));
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_dimensions() {
        // Same raw byte stream, different shape.
        let a = fingerprint(&solid(2, 8, [7, 7, 7, 255]));
        let b = fingerprint(&solid(8, 2, [7, 7, 7, 255]));
        assert_ne!(a, b);
    }
}
