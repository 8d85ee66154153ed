//! External sort throughput across memory budgets.

use std::cmp::Ordering;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use sluice_rs::stream::writer_memory;
use sluice_rs::{ExternalSorter, SorterConfig};

fn ascending(a: &u64, b: &u64) -> Ordering {
    a.cmp(b)
}

fn sort_descending_input(items: u64, formation_bytes: u64) {
    let config = SorterConfig {
        memory: writer_memory(64 * 1024) + formation_bytes,
        min_item_size: 8,
        block_size: 64 * 1024,
    };
    let mut sorter = ExternalSorter::new(config, ascending);
    sorter.begin().unwrap();
    for v in (0..items).rev() {
        sorter.push(&v).unwrap();
    }
    sorter.end().unwrap();
    let mut count = 0u64;
    while sorter.can_pull() {
        let _ = sorter.pull().unwrap();
        count += 1;
    }
    assert_eq!(count, items);
}

fn bench_external_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("external_sort");
    let items = 100_000u64;
    group.throughput(Throughput::Elements(items));

    // Budgets chosen so the small one spills several runs and the large one
    // sorts in memory.
    for (label, formation) in [("spilling", 256 * 1024u64), ("in_memory", 8 << 20)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(label),
            &formation,
            |b, &formation| {
                b.iter(|| sort_descending_input(items, formation));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_external_sort);
criterion_main!(benches);
