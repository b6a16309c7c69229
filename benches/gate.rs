//! Benchmarks for the channel gate.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use podar::autograd::no_grad;
use podar::gate::{winner_take_all, ChannelScorer, GatedBlock};
use podar::Tensor;

fn scores_tensor(batch: usize, channels: usize) -> Tensor {
    let data: Vec<f32> = (0..batch * channels)
        .map(|i| ((i as f32) * 0.37).sin().abs())
        .collect();
    Tensor::new(&data, &[batch, channels])
}

fn feature_map(batch: usize, channels: usize, side: usize) -> Tensor {
    let data: Vec<f32> = (0..batch * channels * side * side)
        .map(|i| ((i as f32) * 0.17).sin())
        .collect();
    Tensor::new(&data, &[batch, channels, side, side])
}

fn bench_winner_take_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("winner_take_all");

    for channels in [64, 128, 192].iter() {
        let scores = scores_tensor(64, *channels);

        group.bench_with_input(BenchmarkId::from_parameter(channels), channels, |b, _| {
            b.iter(|| winner_take_all(black_box(&scores), 0.5));
        });
    }

    group.finish();
}

fn bench_channel_scorer(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_scorer_forward");

    for channels in [64, 128, 192].iter() {
        let scorer = ChannelScorer::with_seed(64, *channels, Some(1));
        let x = feature_map(8, 64, 8);

        group.bench_with_input(BenchmarkId::from_parameter(channels), channels, |b, _| {
            b.iter(|| no_grad(|| scorer.forward(black_box(&x))));
        });
    }

    group.finish();
}

fn bench_gated_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("gated_block_forward");

    for ratio in [0.25f32, 0.5, 1.0].iter() {
        let mut block = GatedBlock::with_seed(64, 128, 3, 1, 1, *ratio, Some(1)).unwrap();
        block.eval();
        let x = feature_map(4, 64, 8);

        group.bench_with_input(BenchmarkId::from_parameter(ratio), ratio, |b, _| {
            b.iter(|| no_grad(|| block.forward(black_box(&x))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_winner_take_all,
    bench_channel_scorer,
    bench_gated_block
);
criterion_main!(benches);
