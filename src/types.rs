//! Request-scoped data carried through the pipeline

use crate::error::Result;
use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{ImageEncoder, RgbaImage};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Raw input bytes and the name they arrived under
///
/// Immutable once received; the pipeline only ever borrows or clones the
/// underlying `Bytes` handle.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Bytes,
    pub filename: String,
}

impl SourceImage {
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
        }
    }

    /// Size of the input in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content fingerprint of the input
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_bytes(&self.bytes)
    }

    /// Filename stem up to the first `.`, used to name the download
    #[must_use]
    pub fn stem(&self) -> &str {
        self.filename
            .split('.')
            .next()
            .filter(|stem| !stem.is_empty())
            .unwrap_or("image")
    }
}

/// First 16 hex digits of the SHA-256 of an input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = format!("{:x}", Sha256::digest(bytes));
        Self(digest.chars().take(16).collect())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of one removal request
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub image: RgbaImage,
    /// Wall time spent in the engine
    pub processing_time: Duration,
    /// Size of the input in bytes
    pub original_size: usize,
}

impl ProcessingResult {
    /// Encode the full-size result as PNG
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn to_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.image)
    }

    /// Encode a thumbnail that fits within `max_width`×`max_height`
    ///
    /// Images already inside the box are encoded at their own size.
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn to_preview_png(&self, max_width: u32, max_height: u32) -> Result<Vec<u8>> {
        let (width, height) = self.image.dimensions();
        let (fit_width, fit_height) = fit_within(width, height, max_width, max_height);
        if (fit_width, fit_height) == (width, height) {
            return self.to_png();
        }
        let thumbnail = imageops::resize(&self.image, fit_width, fit_height, FilterType::Lanczos3);
        encode_png(&thumbnail)
    }

    /// Processing time in seconds, as reported to clients
    #[must_use]
    pub fn processing_seconds(&self) -> f64 {
        self.processing_time.as_secs_f64()
    }
}

/// Largest size with the same aspect ratio inside the box, never larger than the input
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let ratio = (f64::from(max_width) / f64::from(width)).min(f64::from(max_height) / f64::from(height));
    let scaled = |side: u32| ((f64::from(side) * ratio).round() as u32).max(1);
    (scaled(width).min(max_width), scaled(height).min(max_height))
}

/// Encode an RGBA raster as an optimized PNG
///
/// # Errors
/// - PNG encoding failures
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilter::Adaptive);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_stable_prefix() {
        let key = CacheKey::from_bytes(b"hello");
        assert_eq!(key.as_str().len(), 16);
        // sha256("hello") = 2cf24dba5fb0a30e...
        assert_eq!(key.to_string(), "2cf24dba5fb0a30e");
        assert_eq!(key, SourceImage::new(&b"hello"[..], "a.png").cache_key());
    }

    #[test]
    fn test_stem_stops_at_first_dot() {
        assert_eq!(SourceImage::new(Bytes::new(), "photo.final.jpg").stem(), "photo");
        assert_eq!(SourceImage::new(Bytes::new(), "noext").stem(), "noext");
        assert_eq!(SourceImage::new(Bytes::new(), ".hidden").stem(), "image");
    }

    #[test]
    fn test_preview_fits_box_and_never_upscales() {
        let large = ProcessingResult {
            image: RgbaImage::new(1600, 600),
            processing_time: Duration::from_millis(5),
            original_size: 10,
        };
        let preview = image::load_from_memory(&large.to_preview_png(800, 600).unwrap()).unwrap();
        assert_eq!((preview.width(), preview.height()), (800, 300));

        let small = ProcessingResult {
            image: RgbaImage::new(40, 30),
            processing_time: Duration::ZERO,
            original_size: 10,
        };
        let preview = image::load_from_memory(&small.to_preview_png(800, 600).unwrap()).unwrap();
        assert_eq!((preview.width(), preview.height()), (40, 30));
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(1600, 900, 800, 600), (800, 450));
        assert_eq!(fit_within(1000, 3000, 800, 600), (200, 600));
        assert_eq!(fit_within(801, 1, 800, 600), (800, 1));
        assert_eq!(fit_within(640, 480, 800, 600), (640, 480));
    }

    #[test]
    fn test_preview_resample_keeps_flat_colour() {
        let result = ProcessingResult {
            image: RgbaImage::from_pixel(1000, 1000, image::Rgba([10, 200, 30, 255])),
            processing_time: Duration::ZERO,
            original_size: 0,
        };
        let preview = image::load_from_memory(&result.to_preview_png(800, 600).unwrap())
            .unwrap()
            .to_rgba8();
        assert_eq!(preview.dimensions(), (600, 600));
        assert_eq!(preview.get_pixel(300, 300).0, [10, 200, 30, 255]);
    }

    #[test]
    fn test_png_round_trip_keeps_alpha() {
        let mut image = RgbaImage::new(3, 2);
        image.put_pixel(1, 1, image::Rgba([9, 8, 7, 128]));
        let decoded = image::load_from_memory(&encode_png(&image).unwrap())
            .unwrap()
            .to_rgba8();
        assert_eq!(decoded, image);
    }
}
