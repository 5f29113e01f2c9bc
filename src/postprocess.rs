//! Alpha channel refinement
//!
//! The raw model mask has pinholes inside the subject and isolated specks in
//! the background. `AlphaRefiner` runs a greyscale closing then opening on the
//! alpha channel and softens the result with a small Gaussian blur. Colour
//! channels are never touched.

use crate::error::{ClearCutError, Result};
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::{
    distance_transform::euclidean_squared_distance_transform,
    filter::gaussian_blur_f32,
    map::{map_colors, map_colors2},
    morphology::{grayscale_close, grayscale_open, Mask},
};
use tracing::{instrument, warn};

/// Standard deviation of the smoothing blur (a 3×3 kernel)
const BLUR_SIGMA: f32 = 0.5;

/// Weight of the distance-based floor in edge enhancement
const EDGE_FLOOR_WEIGHT: f32 = 0.3;

/// Morphological and smoothing post-processing of alpha masks
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaRefiner;

impl AlphaRefiner {
    /// Refine the alpha channel of an RGBA image
    ///
    /// Non-RGBA input is returned unchanged. Refinement failures are logged
    /// and the input is returned as is; this never fails the caller.
    #[must_use]
    pub fn refine(image: DynamicImage) -> DynamicImage {
        refine_or_original(image, BLUR_SIGMA)
    }

    /// Refine the alpha channel, returning `None` for non-RGBA input
    ///
    /// # Errors
    /// - Invalid blur parameters
    pub fn try_refine(image: &DynamicImage) -> Result<Option<RgbaImage>> {
        refine_alpha(image, BLUR_SIGMA)
    }

    /// Raise the alpha of pixels by their distance from the background
    ///
    /// The alpha is thresholded at half opacity, each foreground pixel's
    /// Euclidean distance to the nearest background pixel is normalized by
    /// the largest distance and passed through a steep sigmoid. Alpha becomes
    /// `max(alpha, 0.3 * sigmoid)`. The sigmoid is non-zero at distance zero,
    /// so background alpha is lifted slightly too.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn enhance_edges(image: DynamicImage) -> DynamicImage {
        let DynamicImage::ImageRgba8(mut rgba) = image else {
            return image;
        };

        // The transform measures distance to the nearest non-zero pixel, so
        // background is marked non-zero
        let background: GrayImage =
            map_colors(&rgba, |p: Rgba<u8>| Luma([if p[3] > 127 { 0 } else { 255 }]));
        let squared = euclidean_squared_distance_transform(&background);

        let distances: Vec<f64> = squared
            .pixels()
            .map(|p| if p[0].is_finite() { p[0].sqrt() } else { 0.0 })
            .collect();
        let max_distance = distances.iter().copied().fold(0.0_f64, f64::max);

        for (pixel, distance) in rgba.pixels_mut().zip(distances) {
            let normalized = if max_distance > 0.0 {
                (distance / max_distance) as f32
            } else {
                distance as f32
            };
            let sigmoid = 1.0 / (1.0 + (-10.0 * (normalized - 0.1)).exp());
            let alpha = (f32::from(pixel[3]) / 255.0).max(sigmoid * EDGE_FLOOR_WEIGHT);
            pixel[3] = (alpha * 255.0).round().clamp(0.0, 255.0) as u8;
        }

        DynamicImage::ImageRgba8(rgba)
    }
}

fn refine_or_original(image: DynamicImage, sigma: f32) -> DynamicImage {
    match refine_alpha(&image, sigma) {
        Ok(Some(refined)) => DynamicImage::ImageRgba8(refined),
        Ok(None) => image,
        Err(e) => {
            warn!(error = %e, "Alpha refinement failed, returning unrefined image");
            image
        },
    }
}

/// Close then open with the 3×3 cross (OpenCV's 3×3 ellipse), then blur
///
/// The blur runs in `f32` and is rounded once, so flat regions keep their
/// exact value.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn refine_alpha(image: &DynamicImage, sigma: f32) -> Result<Option<RgbaImage>> {
    let DynamicImage::ImageRgba8(rgba) = image else {
        return Ok(None);
    };
    if sigma.is_nan() || sigma <= 0.0 {
        return Err(ClearCutError::processing(format!(
            "Blur sigma must be positive, got {sigma}"
        )));
    }

    let cross = Mask::diamond(1);
    let alpha: GrayImage = map_colors(rgba, |p: Rgba<u8>| Luma([p[3]]));
    let opened = grayscale_open(&grayscale_close(&alpha, &cross), &cross);

    let smoothed = gaussian_blur_f32(
        &map_colors(&opened, |p: Luma<u8>| Luma([f32::from(p[0])])),
        sigma,
    );

    Ok(Some(map_colors2(
        rgba,
        &smoothed,
        |mut pixel: Rgba<u8>, a: Luma<f32>| {
            pixel[3] = a[0].round().clamp(0.0, 255.0) as u8;
            pixel
        },
    )))
}
