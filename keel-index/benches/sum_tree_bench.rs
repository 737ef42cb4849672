use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use keel_block::{AllocRef, Block};
use keel_index::{ReduceKind, SearchKind, SummaryTree, TreeConfig};

fn build_tree(n: usize) -> (Block, SummaryTree, i64) {
    let mut rng = StdRng::seed_from_u64(0xBE7C);
    let keys: Vec<i64> = (0..n).map(|_| rng.gen_range(0..100)).collect();
    let total = keys.iter().sum();

    let mut block = Block::with_limit(4096, 64 << 20, 1).unwrap();
    let cfg = TreeConfig {
        values_per_branch: 32,
        branching_factor: 32,
        kind: ReduceKind::Sum,
    };
    let tree = SummaryTree::create(&mut block, AllocRef::ROOT, 0, cfg).unwrap();
    tree.extend(&mut block, &keys).unwrap();
    tree.reindex(&mut block).unwrap();
    (block, tree, total)
}

fn bench_reindex(c: &mut Criterion) {
    let mut group = c.benchmark_group("reindex");
    for n in [1_000usize, 100_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (mut block, tree, _) = build_tree(n);
            b.iter(|| tree.reindex(black_box(&mut block)).unwrap());
        });
    }
    group.finish();
}

fn bench_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum_range");
    for n in [1_000usize, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (block, tree, _) = build_tree(n);
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| {
                let from = rng.gen_range(0..n);
                let to = rng.gen_range(from..=n);
                black_box(tree.sum(&block, from, to).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_find_fw(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_fw_ge");
    for n in [1_000usize, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let (block, tree, total) = build_tree(n);
            let mut rng = StdRng::seed_from_u64(2);
            b.iter(|| {
                let target = rng.gen_range(0..=total);
                black_box(tree.find_fw(&block, 0, SearchKind::Ge, target).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reindex, bench_sum, bench_find_fw);
criterion_main!(benches);
