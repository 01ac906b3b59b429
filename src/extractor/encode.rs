//! Image encoding: rendered `DynamicImage` → JPEG bytes.
//!
//! Extracted pages are stored as JPEG. Page scans are photographic, so the
//! size win over PNG is large and the quality loss at 85 is not visible.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Extension used for every extracted page.
pub const EXTRACTED_EXTENSION: &str = "jpg";

/// Encode a rendered page as JPEG at `quality` (1–100).
///
/// Alpha is dropped first; JPEG has no alpha channel.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)?;
    debug!(
        "Encoded {}x{} page → {} bytes JPEG",
        rgb.width(),
        rgb.height(),
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let bytes = encode_jpeg(&img, 85).expect("encode should succeed");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn lower_quality_is_not_larger() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255])
        }));
        let hi = encode_jpeg(&img, 95).unwrap();
        let lo = encode_jpeg(&img, 10).unwrap();
        assert!(lo.len() <= hi.len());
    }
}
