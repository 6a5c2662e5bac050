use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tengen_net::{sigmoid, sigmoid_interval_avg};

fn bench_sigmoid(c: &mut Criterion) {
    c.bench_function("sigmoid", |b| {
        b.iter(|| {
            black_box(sigmoid(
                black_box(1.3),
                black_box(0.04),
                black_box(-7.5),
                black_box(0.05),
            ))
        })
    });
}

fn bench_interval_avg(c: &mut Criterion) {
    c.bench_function("sigmoid_interval_avg", |b| {
        b.iter(|| {
            black_box(sigmoid_interval_avg(
                black_box(1.3),
                black_box(0.04),
                black_box(0.05),
                black_box(-4.0),
                black_box(6.0),
            ))
        })
    });
}

criterion_group!(benches, bench_sigmoid, bench_interval_avg);
criterion_main!(benches);
