use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gcarray::array::raw;
use gcarray::gc::simple::SimpleCollector;
use gcarray::slice::RawSlice;
use gcarray::typeinfo::TypeInfo;

static INT: TypeInfo = TypeInfo::plain(std::mem::size_of::<i32>());

/// Repeated single-element appends should be amortized O(1): the capacity
/// policy over-allocates past a page, so most appends grow the tail in
/// place instead of reallocating.
pub fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for &n in &[1_000usize, 10_000, 100_000] {
        group.bench_function(BenchmarkId::new("append_x one at a time", n), |b| {
            b.iter_batched(
                || (SimpleCollector::new(), RawSlice::NULL),
                |(gc, mut slice)| {
                    for _ in 0..n {
                        raw::append_x(&gc, &INT, &mut slice, 1);
                    }
                    slice
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
