use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tengen_net::winograd::winograd_transform_f;

fn bench_filter_transform(c: &mut Criterion) {
    let outputs = 128;
    let channels = 128;
    let filters: Vec<f32> = (0..outputs * channels * 9)
        .map(|i| ((i as f32) * 0.13).sin())
        .collect();

    c.bench_function("winograd_transform_128x128", |b| {
        b.iter(|| {
            black_box(winograd_transform_f(
                black_box(&filters),
                outputs,
                channels,
            ))
        })
    });
}

criterion_group!(benches, bench_filter_transform);
criterion_main!(benches);
