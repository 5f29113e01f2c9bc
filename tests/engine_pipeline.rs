//! End-to-end engine tests using the mock backend
//!
//! These exercise decode, downscale, segmentation, restore and refinement
//! without a real model file.

use bytes::Bytes;
use clearcut::{
    backends::mock::MockMask, BackgroundRemover, EngineConfig, MockBackend,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::atomic::Ordering;

fn encode(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 251) as u8, (y % 241) as u8, 200])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, format)
        .unwrap();
    Bytes::from(buffer.into_inner())
}

fn engine_with(backend: MockBackend) -> BackgroundRemover {
    BackgroundRemover::with_backend(Box::new(backend), EngineConfig::default()).unwrap()
}

#[tokio::test]
async fn test_large_image_round_trips_through_downscale() {
    let backend = MockBackend::new();
    let calls = backend.inference_counter();
    let engine = engine_with(backend);

    let result = engine
        .remove_background(encode(4000, 3000, ImageFormat::Jpeg))
        .await
        .unwrap();

    assert_eq!(result.dimensions(), (4000, 3000));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_output_matches_input_dimensions_across_formats() {
    let engine = engine_with(MockBackend::new());

    for (width, height, format) in [
        (1, 1, ImageFormat::Png),
        (17, 91, ImageFormat::Png),
        (320, 240, ImageFormat::Jpeg),
        (2049, 10, ImageFormat::Png),
    ] {
        let result = engine
            .remove_background(encode(width, height, format))
            .await
            .unwrap();
        assert_eq!(result.dimensions(), (width, height), "{format:?} {width}x{height}");
    }
}

#[tokio::test]
async fn test_empty_mask_gives_fully_transparent_zeroed_output() {
    let engine = engine_with(MockBackend::new().with_mask(MockMask::Empty));
    let result = engine
        .remove_background(encode(48, 32, ImageFormat::Png))
        .await
        .unwrap();

    assert!(result.pixels().all(|p| p.0 == [0, 0, 0, 0]));
}

#[tokio::test]
async fn test_full_mask_keeps_colours_opaque() {
    let input = encode(48, 32, ImageFormat::Png);
    let original = image::load_from_memory(&input).unwrap().to_rgb8();

    let engine = engine_with(MockBackend::new().with_mask(MockMask::Full));
    let result = engine.remove_background(input).await.unwrap();

    for (x, y, pixel) in result.enumerate_pixels() {
        assert_eq!(pixel.0[3], 255);
        assert_eq!(&pixel.0[..3], &original.get_pixel(x, y).0[..]);
    }
}

#[tokio::test]
async fn test_circle_mask_separates_subject_from_background() {
    let engine = engine_with(MockBackend::new());
    let result = engine
        .remove_background(encode(300, 300, ImageFormat::Png))
        .await
        .unwrap();

    assert_eq!(result.get_pixel(150, 150).0[3], 255);
    assert_eq!(result.get_pixel(2, 2).0[3], 0);
}

#[tokio::test]
async fn test_input_bytes_untouched() {
    let input = encode(32, 32, ImageFormat::Png);
    let snapshot = input.clone();

    let engine = engine_with(MockBackend::new());
    engine.remove_background(input.clone()).await.unwrap();

    assert_eq!(input, snapshot);
}

#[tokio::test]
async fn test_concurrent_requests_are_all_served() {
    let backend = MockBackend::new();
    let calls = backend.inference_counter();
    let engine = std::sync::Arc::new(engine_with(backend));

    let jobs: Vec<_> = (0..4)
        .map(|i| {
            let engine = std::sync::Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .remove_background(encode(40 + i, 30, ImageFormat::Png))
                    .await
            })
        })
        .collect();

    for (i, job) in jobs.into_iter().enumerate() {
        let result = job.await.unwrap().unwrap();
        assert_eq!(result.dimensions(), (40 + i as u32, 30));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}
