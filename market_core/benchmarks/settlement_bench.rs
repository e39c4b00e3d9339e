use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use market_core::SettlementBook;
use market_runtime::{Behavior, HouseholdId, SettlementRequest};
use rayon::prelude::*;

fn requests(count: u32) -> Vec<(HouseholdId, SettlementRequest)> {
    (1..=count)
        .filter_map(HouseholdId::new)
        .map(|id| {
            let raw = id.get();
            let behavior = Behavior::VARIANTS[raw as usize % Behavior::VARIANTS.len()];
            let net_load = f64::from(raw % 23) - 11.0;
            (id, SettlementRequest { behavior, net_load })
        })
        .collect()
}

fn bench_settlement(c: &mut Criterion) {
    let mut group = c.benchmark_group("settlement");

    for count in [10u32, 100, 1_000] {
        let batch = requests(count);
        group.bench_with_input(BenchmarkId::new("parallel", count), &batch, |b, batch| {
            b.iter_batched(
                SettlementBook::new,
                |book| {
                    let bills: usize = batch
                        .par_iter()
                        .map(|(id, request)| book.settle(*id, *request, 0.15).len())
                        .sum();
                    bills + book.flush(0.15).len()
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_with_input(BenchmarkId::new("serial", count), &batch, |b, batch| {
            b.iter_batched(
                SettlementBook::new,
                |book| {
                    let bills: usize = batch
                        .iter()
                        .map(|(id, request)| book.settle(*id, *request, 0.15).len())
                        .sum();
                    bills + book.flush(0.15).len()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(settlement_benches, bench_settlement);
criterion_main!(settlement_benches);
