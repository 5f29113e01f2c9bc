use clearcut::AlphaRefiner;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgba, RgbaImage};

/// Soft-edged disc on a transparent canvas, similar to a real cut-out
fn cutout(width: u32, height: u32) -> DynamicImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let radius = width.min(height) as f32 / 3.0;
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        let distance = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
        let alpha = ((radius - distance) * 8.0).clamp(0.0, 255.0) as u8;
        Rgba([120, 80, 40, alpha])
    }))
}

fn bench_refine(c: &mut Criterion) {
    let mut group = c.benchmark_group("alpha_refine");
    group.sample_size(20);

    for (width, height) in [(320, 320), (1024, 768), (2048, 1536)] {
        let image = cutout(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &image,
            |b, image| b.iter(|| AlphaRefiner::refine(black_box(image.clone()))),
        );
    }

    group.finish();
}

fn bench_enhance_edges(c: &mut Criterion) {
    let image = cutout(1024, 768);
    c.bench_function("enhance_edges_1024x768", |b| {
        b.iter(|| AlphaRefiner::enhance_edges(black_box(image.clone())));
    });
}

criterion_group!(benches, bench_refine, bench_enhance_edges);
criterion_main!(benches);
