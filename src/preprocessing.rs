//! Tensor conversion around the segmentation model
//!
//! Turns an RGB raster into the normalized NCHW tensor U²-Net expects and
//! turns the model's prediction back into an alpha mask at the raster's size.

use crate::{
    error::{ClearCutError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, RgbImage, RgbaImage};
use ndarray::Array4;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image for model inference
    ///
    /// The image is stretched to the model's input size (aspect ratio is not
    /// kept), scaled by its brightest channel value and normalized with the
    /// per-channel mean and standard deviation.
    ///
    /// # Errors
    /// - Target size does not fit in memory indices
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let [target_width, target_height] = preprocessing_config.target_size;
        if target_width == 0 || target_height == 0 {
            return Err(ClearCutError::processing("Model input size must be non-zero"));
        }

        let resized = image::imageops::resize(
            &image.to_rgb8(),
            target_width,
            target_height,
            FilterType::Lanczos3,
        );

        let width = usize::try_from(target_width).map_err(|_| {
            ClearCutError::processing("Target width too large for tensor allocation")
        })?;
        let height = usize::try_from(target_height).map_err(|_| {
            ClearCutError::processing("Target height too large for tensor allocation")
        })?;

        Ok(Self::canvas_to_tensor(
            &resized,
            preprocessing_config,
            width,
            height,
        ))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(
        canvas: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
        width: usize,
        height: usize,
    ) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, height, width));

        // An all-black input would otherwise divide by zero
        let max_value = f32::from(canvas.as_raw().iter().copied().max().unwrap_or(0).max(1));
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] =
                        (f32::from(pixel[channel]) / max_value - mean[channel]) / std[channel];
                }
            }
        }

        tensor
    }

    /// Convert a model prediction into an alpha mask of `width`×`height`
    ///
    /// The first channel of the first batch entry is min-max normalized to
    /// 0-255 and resized with a Lanczos filter. A constant prediction cannot
    /// be normalized and is clamped to 0-1 instead.
    ///
    /// # Errors
    /// - Tensor is empty
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn tensor_to_mask(tensor: &Array4<f32>, width: u32, height: u32) -> Result<GrayImage> {
        let (batch, channels, mask_height, mask_width) = tensor.dim();
        if batch == 0 || channels == 0 || mask_height == 0 || mask_width == 0 {
            return Err(ClearCutError::processing(format!(
                "Invalid prediction tensor shape {:?}",
                tensor.dim()
            )));
        }

        let prediction = tensor.slice(ndarray::s![0, 0, .., ..]);
        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let mask_width_u32 = u32::try_from(mask_width)
            .map_err(|_| ClearCutError::processing("Prediction too wide"))?;
        let mask_height_u32 = u32::try_from(mask_height)
            .map_err(|_| ClearCutError::processing("Prediction too tall"))?;

        let mut mask = GrayImage::new(mask_width_u32, mask_height_u32);
        for ((y, x), &value) in prediction.indexed_iter() {
            let normalized = if range > f32::EPSILON {
                (value - min) / range
            } else {
                value.clamp(0.0, 1.0)
            };
            mask.put_pixel(
                x as u32,
                y as u32,
                Luma([(normalized * 255.0).clamp(0.0, 255.0) as u8]),
            );
        }

        if (mask_width_u32, mask_height_u32) == (width, height) {
            return Ok(mask);
        }
        Ok(image::imageops::resize(
            &mask,
            width,
            height,
            FilterType::Lanczos3,
        ))
    }

    /// Cut the foreground out of `image` using `mask` as its alpha channel
    ///
    /// Fully transparent pixels are zeroed so no background colour leaks
    /// through later resampling.
    ///
    /// # Errors
    /// - Mask and image dimensions differ
    pub fn apply_mask(image: &RgbImage, mask: &GrayImage) -> Result<RgbaImage> {
        if image.dimensions() != mask.dimensions() {
            return Err(ClearCutError::processing(format!(
                "Mask size {:?} does not match image size {:?}",
                mask.dimensions(),
                image.dimensions()
            )));
        }

        let mut output = RgbaImage::new(image.width(), image.height());
        for ((out, rgb), alpha) in output
            .pixels_mut()
            .zip(image.pixels())
            .zip(mask.pixels())
        {
            let a = alpha[0];
            *out = if a == 0 {
                image::Rgba([0, 0, 0, 0])
            } else {
                image::Rgba([rgb[0], rgb[1], rgb[2], a])
            };
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn create_test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 60, Rgb([255, 0, 0])))
    }

    #[test]
    fn test_preprocess_stretches_to_model_size() {
        let tensor = ImagePreprocessor::preprocess_for_inference(
            &create_test_image(),
            &PreprocessingConfig::u2net(),
        )
        .unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        // Red divided by the brightest value is 1.0
        let expected_r = (1.0 - 0.485) / 0.229;
        assert!((tensor[[0, 0, 160, 160]] - expected_r).abs() < 1e-3);
        let expected_g = (0.0 - 0.456) / 0.224;
        assert!((tensor[[0, 1, 10, 10]] - expected_g).abs() < 1e-3);
    }

    #[test]
    fn test_black_image_does_not_produce_nan() {
        let black = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let tensor =
            ImagePreprocessor::preprocess_for_inference(&black, &PreprocessingConfig::u2net())
                .unwrap();
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_tensor_to_mask_normalizes_and_resizes() {
        let mut tensor = Array4::<f32>::from_elem((1, 1, 4, 4), 0.2);
        tensor[[0, 0, 0, 0]] = 0.6;

        let mask = ImagePreprocessor::tensor_to_mask(&tensor, 4, 4).unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
        assert_eq!(mask.get_pixel(3, 3)[0], 0);

        let resized = ImagePreprocessor::tensor_to_mask(&tensor, 40, 20).unwrap();
        assert_eq!(resized.dimensions(), (40, 20));
    }

    #[test]
    fn test_constant_prediction_is_clamped() {
        let tensor = Array4::<f32>::from_elem((1, 1, 2, 2), 1.0);
        let mask = ImagePreprocessor::tensor_to_mask(&tensor, 2, 2).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_apply_mask_zeroes_transparent_pixels() {
        let image = RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]));
        let mut mask = GrayImage::new(2, 1);
        mask.put_pixel(1, 0, Luma([128]));

        let cutout = ImagePreprocessor::apply_mask(&image, &mask).unwrap();
        assert_eq!(cutout.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(cutout.get_pixel(1, 0).0, [10, 20, 30, 128]);

        assert!(ImagePreprocessor::apply_mask(&image, &GrayImage::new(1, 1)).is_err());
    }
}
