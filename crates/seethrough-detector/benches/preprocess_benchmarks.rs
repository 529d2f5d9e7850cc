//! Preprocessing and classification benchmarks
//!
//! Preprocessing runs on every request before the forward pass, so its cost
//! is paid even when the model itself is fast.
//!
//! Run with: cargo bench -p seethrough-detector

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

use seethrough_detector::{classify, score_from_probability, CropRegion, ImagePreprocessor};

fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut image = RgbaImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        *pixel = Rgba([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8, 255]);
    }
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    };
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// Decode + resize + planar conversion for typical web image sizes
fn benchmark_preprocess(c: &mut Criterion) {
    let preprocessor = ImagePreprocessor::new(384, 384);

    let cases = vec![
        ("thumbnail_png", encoded_image(150, 150, ImageFormat::Png)),
        ("photo_jpeg", encoded_image(1024, 768, ImageFormat::Jpeg)),
        ("large_png", encoded_image(1920, 1080, ImageFormat::Png)),
    ];

    let mut group = c.benchmark_group("Preprocess");
    group.sample_size(20);

    for (name, bytes) in &cases {
        group.bench_with_input(BenchmarkId::new("preprocess_bytes", name), bytes, |b, bytes| {
            b.iter(|| preprocessor.preprocess_bytes(black_box(bytes)).unwrap())
        });
    }

    let (_, photo) = &cases[1];
    group.bench_function("preprocess_region", |b| {
        b.iter(|| {
            preprocessor
                .preprocess_region(black_box(photo), CropRegion::new(100, 100, 400, 300))
                .unwrap()
        })
    });

    group.finish();
}

/// Score mapping runs once per result
fn benchmark_classify(c: &mut Criterion) {
    c.bench_function("score_and_classify", |b| {
        b.iter(|| {
            for p in [0.01f32, 0.3, 0.5, 0.955] {
                black_box(classify(score_from_probability(black_box(p))));
            }
        })
    });
}

criterion_group!(benches, benchmark_preprocess, benchmark_classify);
criterion_main!(benches);
