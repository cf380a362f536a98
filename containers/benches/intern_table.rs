//! Benchmarks for the intern table lookup path
//!
//! - Insert: filling a table with distinct keys
//! - Hit: looking up keys that are already interned, the steady state of a layout registry

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use scratch_containers::prelude::{ContainerErrors, InternTable};
use std::hint::black_box;

fn benchmark_intern_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("intern_table_insert");
    for size in [16u64, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("InternTable", size), size, |b, &size| {
            b.iter(|| {
                let mut table: InternTable<u64, u64> = InternTable::new(size as usize);
                for i in 0..size {
                    black_box(
                        table
                            .get_or_insert_with::<ContainerErrors, _>(black_box(i), |key| Ok(*key))
                            .unwrap(),
                    );
                }
                black_box(table)
            });
        });
    }
    group.finish();
}

fn benchmark_intern_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("intern_table_hit");
    for size in [16u64, 256, 4096].iter() {
        let mut table: InternTable<u64, u64> = InternTable::new(*size as usize);
        for i in 0..*size {
            table
                .get_or_insert_with::<ContainerErrors, _>(i, |key| Ok(*key))
                .unwrap();
        }
        group.bench_with_input(BenchmarkId::new("InternTable", size), size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    black_box(table.find(black_box(&i)));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_intern_insert, benchmark_intern_hit);
criterion_main!(benches);
