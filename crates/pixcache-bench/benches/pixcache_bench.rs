//! Benchmarks for pixel cache access.
//!
//! Run with: `cargo bench -p pixcache-bench`
//! Set `RUST_LOG=pixcache=debug` to see allocation decisions.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

use pixcache::{CacheConfig, CacheContext, CacheType, CacheView, Image, VirtualPixelMethod};
use pixcache_core::{PixelPacket, QUANTUM_RANGE};

const SIZE: usize = 512;

fn context() -> Arc<CacheContext> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    CacheContext::init(CacheConfig::default())
}

fn gradient(ctx: &Arc<CacheContext>, kind: CacheType) -> Image {
    let mut image = Image::new(ctx, SIZE, SIZE).expect("image");
    image.set_cache_type(Some(kind)).expect("cache type");
    for y in 0..SIZE {
        let mut row = image.queue_authentic_pixels(0, y as i64, SIZE, 1).expect("row");
        for (x, px) in row.pixels_mut().iter_mut().enumerate() {
            *px = PixelPacket::opaque(x as u16, y as u16, QUANTUM_RANGE / 2);
        }
        row.sync().expect("sync");
    }
    image
}

/// Row-at-a-time authentic access on each store.
fn bench_rows(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("rows");
    group.throughput(Throughput::Elements((SIZE * SIZE) as u64));

    for kind in [CacheType::Memory, CacheType::Map, CacheType::Disk] {
        let mut image = gradient(&ctx, kind);
        group.bench_function(BenchmarkId::new("invert", kind), |b| {
            b.iter(|| {
                for y in 0..SIZE as i64 {
                    let mut row = image.get_authentic_pixels(0, y, SIZE, 1).expect("row");
                    for px in row.pixels_mut() {
                        px.red = QUANTUM_RANGE - px.red;
                    }
                    row.sync().expect("sync");
                }
            })
        });

        let image = gradient(&ctx, kind);
        group.bench_function(BenchmarkId::new("parallel_read", kind), |b| {
            let view = CacheView::virtual_view(&image);
            b.iter(|| {
                (0..SIZE as i64)
                    .into_par_iter()
                    .map(|y| {
                        let row = view.get_virtual_pixels(0, y, SIZE, 1).expect("row");
                        row.pixels().iter().map(|px| px.green as u64).sum::<u64>()
                    })
                    .sum::<u64>()
            })
        });
    }

    group.finish();
}

/// Windows hanging over the image border.
fn bench_virtual(c: &mut Criterion) {
    let ctx = context();
    let image = gradient(&ctx, CacheType::Memory);
    let mut group = c.benchmark_group("virtual");
    let side = 64usize;
    group.throughput(Throughput::Elements((side * side) as u64));

    for method in [
        VirtualPixelMethod::Edge,
        VirtualPixelMethod::Tile,
        VirtualPixelMethod::Mirror,
        VirtualPixelMethod::Black,
        VirtualPixelMethod::Random,
    ] {
        group.bench_function(format!("{method:?}"), |b| {
            b.iter(|| {
                let window = image
                    .get_virtual_pixels_with(method, black_box(-32), black_box(-32), side, side)
                    .expect("window");
                black_box(window.pixels()[0])
            })
        });
    }

    group.bench_function("one_pixel_inside", |b| {
        b.iter(|| image.get_one_virtual_pixel(black_box(100), black_box(100)).expect("pixel"))
    });

    group.finish();
}

/// Copy-on-write cloning between stores.
fn bench_clone(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("clone");
    group.throughput(Throughput::Bytes((SIZE * SIZE * PixelPacket::SIZE) as u64));
    group.sample_size(20);

    for (from, to) in [
        (CacheType::Memory, CacheType::Memory),
        (CacheType::Memory, CacheType::Disk),
        (CacheType::Disk, CacheType::Memory),
    ] {
        let source = gradient(&ctx, from);
        group.bench_function(format!("{from}_to_{to}"), |b| {
            b.iter(|| {
                let mut copy = source.clone();
                if from == to {
                    copy.get_image_pixel_cache(true).expect("private cache");
                } else {
                    copy.set_cache_type(Some(to)).expect("cache type");
                }
                copy
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rows, bench_virtual, bench_clone);
criterion_main!(benches);
