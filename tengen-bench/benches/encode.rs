use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tengen_bench::midgame_state;
use tengen_features::{gather_features, EncodingSpec};

fn bench_gather_features(c: &mut Criterion) {
    let game = midgame_state();

    let plain = EncodingSpec::default();
    c.bench_function("gather_features_default", |b| {
        b.iter(|| black_box(gather_features(black_box(&game), 3, &plain)))
    });

    let rich = EncodingSpec {
        input_moves: 8,
        adv_features: true,
        chainlibs_features: true,
        chainsize_features: true,
        include_color: true,
    };
    c.bench_function("gather_features_all_planes", |b| {
        b.iter(|| black_box(gather_features(black_box(&game), 3, &rich)))
    });
}

criterion_group!(benches, bench_gather_features);
criterion_main!(benches);
