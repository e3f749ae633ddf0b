use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::Instant;

use chalk_core::{
    interpolate, BitmapRenderer, InputSnapshot, MarkerId, Pen, Point, Rgba, SurfaceId,
    Whiteboard, WhiteboardConfig,
};

fn bench_interpolate(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stroke");
    group.throughput(Throughput::Elements(1));

    let pen = Pen {
        color: Rgba::WHITE,
        width: 5,
    };
    group.bench_function("interpolate_diagonal_200px", |b| {
        b.iter(|| {
            let stamps = interpolate(
                black_box(Point::new(10, 20)),
                black_box(Point::new(190, 107)),
                pen,
            );
            black_box(stamps);
        })
    });

    group.bench_function("interpolate_thin_pen", |b| {
        let thin = Pen { width: 3, ..pen };
        b.iter(|| black_box(interpolate(Point::new(3, 90), Point::new(97, 1), thin)))
    });

    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("Whiteboard");
    group.throughput(Throughput::Elements(1));

    let config = WhiteboardConfig {
        surface_width: 512,
        surface_height: 512,
        ..WhiteboardConfig::default()
    };

    group.bench_function("tick_stroking_marker", |b| {
        let mut board = Whiteboard::init(config.clone(), BitmapRenderer::new(Rgba::BLACK));
        let now = Instant::now();
        let mut x = 0;
        b.iter(|| {
            x = (x + 7) % 500;
            let input = InputSnapshot::new().touch(MarkerId(0), SurfaceId(0), x, 256);
            board.tick(black_box(&input), now);
            black_box(board.take_outbound());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_interpolate, bench_tick);
criterion_main!(benches);
