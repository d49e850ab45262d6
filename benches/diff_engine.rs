//! Diff Engine Benchmark
//! Measures a full two-way comparison of partition-sized datasets

use bitmap_reconcile::diff::diff;
use bitmap_reconcile::registry::{Claim, KeyedDataset};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn create_dataset(label: &str, size: u64, drift: u64) -> KeyedDataset {
    let source: Arc<str> = Arc::from(label);
    KeyedDataset::from_claims(
        label,
        (0..size).map(|i| Claim {
            sat: 1_000_000 + i * 7,
            // Every `drift`th claim points at a neighbouring block
            block: if drift > 0 && i % drift == 0 { i + 1 } else { i },
            source: source.clone(),
        }),
    )
}

fn benchmark_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for size in [1_000u64, 10_000, 100_000] {
        let a = create_dataset("A", size, 0);
        let b = create_dataset("B", size, 50);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| black_box(diff(black_box(&a), black_box(&b))))
        });
    }
    group.finish();
}

fn benchmark_parse_partition(c: &mut Criterion) {
    // One default-size partition in canonical shape
    let records: Vec<String> = (0..10_000u64)
        .map(|i| {
            format!(
                r#"{{"block":{},"iD":"{}i0","sat":{}}}"#,
                i,
                "ab".repeat(32),
                1_000_000 + i
            )
        })
        .collect();
    let text = format!("[{}]", records.join(","));

    c.bench_function("parse_partition_10000", |b| {
        b.iter(|| black_box(KeyedDataset::from_json("A", "bench.json", black_box(&text))))
    });
}

criterion_group!(benches, benchmark_diff, benchmark_parse_partition);
criterion_main!(benches);
