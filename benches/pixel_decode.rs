//! Benchmarks for drawing frames onto the playback surface
//!
//! Covers the per-tick cost at the default 250x250 surface and at 500x500,
//! plus the scalar intensity mapping on its own.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fluidstream::pixel::{self, ImageSurface};
use fluidstream::test_utils::gradient_frame;
use std::hint::black_box;

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("pixel_decode");

    for size in [250, 500] {
        let frame = gradient_frame(0, size, size);
        let mut surface = ImageSurface::new(size as u32, size as u32);
        group.throughput(Throughput::Elements((size * size) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| pixel::decode(black_box(frame), &mut surface))
        });
    }

    group.finish();
}

fn bench_intensity(c: &mut Criterion) {
    let values: Vec<f32> = (0..1024).map(|i| i as f32 / 1023.0).collect();

    c.bench_function("intensity_1024", |b| {
        b.iter(|| values.iter().map(|v| pixel::intensity(black_box(*v)) as u32).sum::<u32>())
    });
}

fn bench_truncated(c: &mut Criterion) {
    let mut frame = gradient_frame(0, 250, 250);
    frame.pixels.truncate(250 * 125);
    let mut surface = ImageSurface::new(250, 250);

    c.bench_function("pixel_decode_truncated_half", |b| {
        b.iter(|| pixel::decode(black_box(&frame), &mut surface))
    });
}

criterion_group!(benches, bench_decode, bench_intensity, bench_truncated);
criterion_main!(benches);
